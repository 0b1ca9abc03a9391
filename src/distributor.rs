//! Placement policy (§4.5): score candidate nodes, spread shards across
//! regions, and relax constraints gracefully when the candidate pool is thin.

use crate::collaborators::NodeDirectory;
use crate::error::{CdeError, Result};
use crate::types::{ChunkIndex, ContentId, NodeInfo, Policy};

/// Scoring weights applied when ranking candidate nodes: higher reliability
/// and lower RTT both raise a node's score.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub reliability: f64,
    pub latency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            reliability: 1.0,
            latency: 0.001,
        }
    }
}

fn score(node: &NodeInfo, weights: &ScoreWeights) -> f64 {
    weights.reliability * node.reliability - weights.latency * node.rtt_estimate_ms
}

/// Chooses a placement for every shard of one chunk, preferring one node per
/// distinct region, falling back to repeats only once the region pool is
/// exhausted (§4.5's constraint-relaxation rule).
pub struct Distributor<'a> {
    directory: &'a dyn NodeDirectory,
    weights: ScoreWeights,
}

impl<'a> Distributor<'a> {
    pub fn new(directory: &'a dyn NodeDirectory) -> Self {
        Self {
            directory,
            weights: ScoreWeights::default(),
        }
    }

    pub fn with_weights(directory: &'a dyn NodeDirectory, weights: ScoreWeights) -> Self {
        Self { directory, weights }
    }

    /// Select `n` distinct nodes for the shards of `(content_id,
    /// chunk_index)` under `policy`, ranked by score and capped at `R_max =
    /// max(1, ceil(n / regions_available))` shards per region (§4.5 invariant
    /// 4). Relaxes the region cap only once it can't place every shard
    /// otherwise; never relaxes distinctness — a node never receives two
    /// shards of the same chunk.
    pub async fn select_placement(
        &self,
        content_id: &ContentId,
        chunk_index: ChunkIndex,
        policy: &Policy,
    ) -> Result<Vec<NodeInfo>> {
        let n = policy.total_shards() as usize;
        let shard_len = policy.shard_len() as u64;
        let mut candidates = self.directory.candidates(None).await?;
        candidates.retain(|c| c.reliability >= policy.min_reliability && c.available_capacity >= shard_len);
        if candidates.is_empty() {
            return Err(CdeError::PlacementInfeasible {
                content_id: *content_id,
                chunk_index,
            });
        }

        candidates.sort_by(|a, b| {
            score(b, &self.weights)
                .partial_cmp(&score(a, &self.weights))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let regions_available = candidates
            .iter()
            .map(|c| c.region.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len()
            .max(1);
        let r_max = (n + regions_available - 1) / regions_available;
        let r_max = r_max.max(1);

        let mut selected: Vec<NodeInfo> = Vec::with_capacity(n);
        let mut used_nodes: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut region_counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();

        // First pass: respect the per-region cap.
        for candidate in &candidates {
            if selected.len() == n {
                break;
            }
            let count = region_counts.entry(candidate.region.as_str()).or_insert(0);
            if *count < r_max && used_nodes.insert(candidate.node_id.as_str()) {
                *count += 1;
                selected.push(candidate.clone());
            }
        }

        // Relaxation pass: region cap exhausted across the whole pool, allow
        // exceeding it, but every node is still used at most once.
        if selected.len() < n {
            for candidate in &candidates {
                if selected.len() == n {
                    break;
                }
                if used_nodes.insert(candidate.node_id.as_str()) {
                    selected.push(candidate.clone());
                }
            }
        }

        if selected.len() < n {
            return Err(CdeError::PlacementInfeasible {
                content_id: *content_id,
                chunk_index,
            });
        }

        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryDirectory;

    fn node(id: &str, region: &str, reliability: f64, rtt: f64) -> NodeInfo {
        NodeInfo {
            node_id: id.to_string(),
            region: region.to_string(),
            reliability,
            available_capacity: 1_000_000,
            rtt_estimate_ms: rtt,
        }
    }

    #[tokio::test]
    async fn prefers_one_node_per_region_when_possible() {
        let dir = InMemoryDirectory::new();
        dir.add_node(node("n1", "eu", 0.9, 10.0));
        dir.add_node(node("n2", "us", 0.9, 10.0));
        dir.add_node(node("n3", "ap", 0.9, 10.0));

        let distributor = Distributor::new(&dir);
        let policy = Policy::new(3, 0, 9).unwrap();
        let placement = distributor
            .select_placement(&ContentId::new([0; 16]), 0, &policy)
            .await
            .unwrap();

        let regions: std::collections::HashSet<_> = placement.iter().map(|n| &n.region).collect();
        assert_eq!(regions.len(), 3);
    }

    #[tokio::test]
    async fn rejects_nodes_below_reliability_floor() {
        let dir = InMemoryDirectory::new();
        dir.add_node(node("n1", "eu", 0.1, 10.0));

        let distributor = Distributor::new(&dir);
        let policy = Policy::with_reliability(1, 0, 1, 0.5, 0).unwrap();
        let err = distributor
            .select_placement(&ContentId::new([1; 16]), 0, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, CdeError::PlacementInfeasible { .. }));
    }

    #[tokio::test]
    async fn relaxes_region_constraint_when_pool_is_thin() {
        let dir = InMemoryDirectory::new();
        dir.add_node(node("n1", "eu", 0.9, 5.0));
        dir.add_node(node("n2", "eu", 0.8, 15.0));

        let distributor = Distributor::new(&dir);
        let policy = Policy::new(2, 0, 2).unwrap();
        let placement = distributor
            .select_placement(&ContentId::new([2; 16]), 0, &policy)
            .await
            .unwrap();
        assert_eq!(placement.len(), 2);
    }
}
