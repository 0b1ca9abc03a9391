//! Engine configuration: a policy table keyed by content type plus
//! engine-wide tunables, built once via the builder pattern and validated
//! before an [`crate::engine::Engine`] is constructed.

use crate::distributor::ScoreWeights;
use crate::types::Policy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Per-content-type Reed-Solomon and placement policy, keyed by a content
/// type string (e.g. `"video/mp4"`, `"application/octet-stream"`). Lookups
/// fall back to `default_policy` when a type has no explicit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTable {
    pub default_policy: Policy,
    pub overrides: HashMap<String, Policy>,
}

impl PolicyTable {
    pub fn new(default_policy: Policy) -> Self {
        Self {
            default_policy,
            overrides: HashMap::new(),
        }
    }

    pub fn policy_for(&self, content_type: &str) -> Policy {
        self.overrides
            .get(content_type)
            .copied()
            .unwrap_or(self.default_policy)
    }

    pub fn with_override(mut self, content_type: impl Into<String>, policy: Policy) -> Self {
        self.overrides.insert(content_type.into(), policy);
        self
    }
}

/// Engine-wide configuration, built once at startup and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub policies: PolicyTable,
    /// Worker pool size for parallelisable pipeline stages and retrieval fetch fan-out.
    pub workers: usize,
    /// Byte budget for the retriever's LRU chunk cache.
    pub chunk_cache_bytes: usize,
    /// Distributor scoring weights.
    #[serde(skip)]
    pub score_weights: ScoreWeights,
    /// Health scan: fraction of shards (1-in-N) that get a full blake3
    /// verification each pass; the rest get a cheap liveness check only.
    pub verify_sample_rate: u32,
    /// How often the health/repair loop runs.
    pub health_scan_interval: Duration,
    /// How often the orphan garbage collector runs.
    pub gc_interval: Duration,
}

impl Config {
    pub fn new(default_policy: Policy) -> Self {
        Self {
            policies: PolicyTable::new(default_policy),
            workers: 8,
            chunk_cache_bytes: 256 * 1024 * 1024,
            score_weights: ScoreWeights::default(),
            verify_sample_rate: 32,
            health_scan_interval: Duration::from_secs(3600),
            gc_interval: Duration::from_secs(86_400),
        }
    }

    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_chunk_cache_bytes(mut self, bytes: usize) -> Self {
        self.chunk_cache_bytes = bytes;
        self
    }

    pub fn with_score_weights(mut self, weights: ScoreWeights) -> Self {
        self.score_weights = weights;
        self
    }

    pub fn with_verify_sample_rate(mut self, one_in_n: u32) -> Self {
        self.verify_sample_rate = one_in_n.max(1);
        self
    }

    /// Favor throughput: larger chunks, lower redundancy, a bigger worker pool.
    pub fn high_performance() -> Self {
        let policy = Policy::new(16, 4, 128 * 1024).expect("valid high-performance policy");
        Self::new(policy).with_workers(16).with_chunk_cache_bytes(1024 * 1024 * 1024)
    }

    /// Favor durability over storage efficiency: heavy parity, frequent verification.
    pub fn high_reliability() -> Self {
        let policy =
            Policy::with_reliability(10, 10, 64 * 1024, 0.8, 8).expect("valid high-reliability policy");
        Self::new(policy)
            .with_workers(8)
            .with_verify_sample_rate(8)
    }

    /// Favor storage efficiency: small overhead, smaller chunks.
    pub fn minimal_storage() -> Self {
        let policy = Policy::new(20, 2, 32 * 1024).expect("valid minimal-storage policy");
        Self::new(policy).with_workers(4).with_chunk_cache_bytes(64 * 1024 * 1024)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }
        if self.chunk_cache_bytes == 0 {
            anyhow::bail!("chunk_cache_bytes must be greater than 0");
        }
        if self.verify_sample_rate == 0 {
            anyhow::bail!("verify_sample_rate must be at least 1");
        }
        if self.policies.default_policy.k == 0 {
            anyhow::bail!("default policy must have k > 0");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Policy::new(4, 2, 64 * 1024).expect("valid default policy"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn presets_validate() {
        assert!(Config::high_performance().validate().is_ok());
        assert!(Config::high_reliability().validate().is_ok());
        assert!(Config::minimal_storage().validate().is_ok());
    }

    #[test]
    fn policy_table_falls_back_to_default() {
        let policy = Policy::new(4, 2, 8).unwrap();
        let video_policy = Policy::new(10, 10, 20).unwrap();
        let table = PolicyTable::new(policy).with_override("video/mp4", video_policy);

        assert_eq!(table.policy_for("video/mp4").k, 10);
        assert_eq!(table.policy_for("text/plain").k, 4);
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.workers = 0;
        assert!(config.validate().is_err());
    }
}
