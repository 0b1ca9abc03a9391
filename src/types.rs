//! Data model types shared across the engine (§3).

use crate::error::{FecError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 128-bit content identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentId([u8; 16]);

impl ContentId {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Derive a deterministic id from plaintext content (used by tests and the
    /// convergence-free default path; callers MAY also supply a random id).
    pub fn from_content(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash.as_bytes()[..16]);
        Self(bytes)
    }

    /// Generate a fresh random id using the supplied RNG collaborator.
    pub fn random(rng: &mut impl rand_core::RngCore) -> Self {
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// 0-based chunk index within a content.
pub type ChunkIndex = u32;

/// Shard index within a chunk, in `[0, k+m)`.
pub type ShardIndex = u16;

/// Whether a shard carries original data or derived parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardRole {
    Data,
    Parity,
}

/// Reed-Solomon parameters for a content type (§3 `Policy`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Data shards (k).
    pub k: u16,
    /// Parity shards (m).
    pub m: u16,
    /// Bytes per chunk; must be divisible by `k`.
    pub chunk_size: u32,
    /// Minimum acceptable node reliability for placement (ρ_min).
    pub min_reliability: f64,
    /// Repair headroom (H): spare shards a healthy chunk keeps above `k`.
    pub repair_headroom: u16,
}

impl Policy {
    pub fn new(k: u16, m: u16, chunk_size: u32) -> Result<Self> {
        Self::with_reliability(k, m, chunk_size, 0.5, 5)
    }

    pub fn with_reliability(
        k: u16,
        m: u16,
        chunk_size: u32,
        min_reliability: f64,
        repair_headroom: u16,
    ) -> Result<Self> {
        if k == 0
            || k as u32 + m as u32 > 256
            || chunk_size == 0
            || chunk_size % k.max(1) as u32 != 0
        {
            return Err(FecError::InvalidShape {
                k: k as usize,
                m: m as usize,
                data_len: chunk_size as usize,
            }
            .into());
        }
        Ok(Self {
            k,
            m,
            chunk_size,
            min_reliability,
            repair_headroom,
        })
    }

    /// A degenerate replication policy: `n` total copies via `k=1, m=n-1`
    /// through the same codec path (§9 open question).
    pub fn replication(n: u16, chunk_size: u32) -> Result<Self> {
        Self::new(1, n.saturating_sub(1), chunk_size)
    }

    pub fn total_shards(&self) -> u16 {
        self.k + self.m
    }

    pub fn shard_len(&self) -> u32 {
        self.chunk_size / self.k as u32
    }

    pub fn role_of(&self, shard_index: ShardIndex) -> ShardRole {
        if shard_index < self.k {
            ShardRole::Data
        } else {
            ShardRole::Parity
        }
    }
}

/// §3 `Content` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRow {
    pub content_id: ContentId,
    pub byte_length: u64,
    pub content_type: String,
    pub created_at: u64,
    pub policy: Policy,
    pub chunk_count: u32,
}

/// §3 `Chunk` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRow {
    pub content_id: ContentId,
    pub chunk_index: ChunkIndex,
    pub payload_length: u32,
}

/// §3 `Shard` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRow {
    pub content_id: ContentId,
    pub chunk_index: ChunkIndex,
    pub shard_index: ShardIndex,
    pub role: ShardRole,
    pub byte_length: u32,
    pub sink_id: Vec<u8>,
    pub content_hash: [u8; 32],
}

/// §3 `Placement` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementRow {
    pub content_id: ContentId,
    pub chunk_index: ChunkIndex,
    pub shard_index: ShardIndex,
    pub node_id: String,
    pub region: String,
    pub placed_at: u64,
    pub last_verified: u64,
}

/// A candidate (or holder) node as reported by the directory collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub region: String,
    pub reliability: f64,
    pub available_capacity: u64,
    pub rtt_estimate_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_rejects_zero_k() {
        assert!(Policy::new(0, 4, 64).is_err());
    }

    #[test]
    fn policy_rejects_non_divisible_chunk_size() {
        assert!(Policy::new(3, 2, 10).is_err());
    }

    #[test]
    fn policy_rejects_too_many_total_shards() {
        assert!(Policy::new(200, 100, 3000).is_err());
    }

    #[test]
    fn policy_accepts_valid_params() {
        let p = Policy::new(4, 8, 64).unwrap();
        assert_eq!(p.total_shards(), 12);
        assert_eq!(p.shard_len(), 16);
    }

    #[test]
    fn replication_policy_is_k1() {
        let p = Policy::replication(3, 60).unwrap();
        assert_eq!(p.k, 1);
        assert_eq!(p.m, 2);
    }

    #[test]
    fn role_of_splits_at_k() {
        let p = Policy::new(4, 8, 64).unwrap();
        assert_eq!(p.role_of(0), ShardRole::Data);
        assert_eq!(p.role_of(3), ShardRole::Data);
        assert_eq!(p.role_of(4), ShardRole::Parity);
    }

    #[test]
    fn content_id_display_is_hex() {
        let id = ContentId::new([0xab; 16]);
        assert_eq!(id.to_string(), "ab".repeat(16));
    }
}
