//! Orphan blob garbage collection (§9): mark-and-sweep comparing each
//! `ObjectSink`'s own key enumeration against the Fragment Index's live
//! placement set, deleting anything the index no longer references.
//!
//! Unlike the teacher's `RetentionPolicy::KeepRecent` (time-based), this
//! engine has no version history — a key is garbage the instant no
//! `PlacementRow` points at it, regardless of age.

use crate::collaborators::NodeDirectory;
use crate::error::Result;
use crate::index::FragmentIndex;
use crate::retriever::shard_key;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub scanned_nodes: usize,
    pub orphans_deleted: usize,
}

pub struct GarbageCollector {
    index: Arc<FragmentIndex>,
    directory: Arc<dyn NodeDirectory>,
}

impl GarbageCollector {
    pub fn new(index: Arc<FragmentIndex>, directory: Arc<dyn NodeDirectory>) -> Self {
        Self { index, directory }
    }

    /// Sweep every node this directory knows about, deleting any shard key
    /// not backed by a live placement row.
    pub async fn run(&self) -> Result<GcReport> {
        let live: HashSet<Vec<u8>> = self
            .index
            .all_placements()
            .into_iter()
            .map(|p| shard_key(&p.content_id, p.chunk_index, p.shard_index))
            .collect();

        let mut report = GcReport::default();
        for node in self.directory.candidates(None).await? {
            let sink = match self.directory.sink_for(&node.node_id).await {
                Ok(sink) => sink,
                Err(e) => {
                    warn!(node = %node.node_id, error = %e, "gc: could not reach node, skipping");
                    continue;
                }
            };
            report.scanned_nodes += 1;

            let keys = sink.list().await.unwrap_or_default();
            for key in keys {
                if !live.contains(&key) {
                    if sink.delete(&key).await.is_ok() {
                        report.orphans_deleted += 1;
                    }
                }
            }
        }

        info!(
            scanned_nodes = report.scanned_nodes,
            orphans_deleted = report.orphans_deleted,
            "garbage collection pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryDirectory;
    use crate::types::{ContentId, NodeInfo, PlacementRow};

    #[tokio::test]
    async fn deletes_keys_not_covered_by_a_live_placement() {
        let index = Arc::new(FragmentIndex::new());
        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_node(NodeInfo {
            node_id: "n1".to_string(),
            region: "eu".to_string(),
            reliability: 1.0,
            available_capacity: 1000,
            rtt_estimate_ms: 1.0,
        });

        let content_id = ContentId::new([1; 16]);
        let live_key = shard_key(&content_id, 0, 0);
        let orphan_key = shard_key(&content_id, 0, 1);

        let sink = directory.sink_for("n1").await.unwrap();
        sink.put(&live_key, b"live").await.unwrap();
        sink.put(&orphan_key, b"orphan").await.unwrap();

        use crate::types::{ContentRow, Policy};
        index
            .commit_ingest(
                ContentRow {
                    content_id,
                    byte_length: 4,
                    content_type: "application/octet-stream".to_string(),
                    created_at: 0,
                    policy: Policy::new(1, 0, 4).unwrap(),
                    chunk_count: 1,
                },
                vec![],
                vec![],
                vec![PlacementRow {
                    content_id,
                    chunk_index: 0,
                    shard_index: 0,
                    node_id: "n1".to_string(),
                    region: "eu".to_string(),
                    placed_at: 0,
                    last_verified: 0,
                }],
            )
            .unwrap();

        let gc = GarbageCollector::new(index, directory.clone());
        let report = gc.run().await.unwrap();
        assert_eq!(report.orphans_deleted, 1);

        let sink = directory.sink_for("n1").await.unwrap();
        assert!(sink.has(&live_key).await.unwrap());
        assert!(!sink.has(&orphan_key).await.unwrap());
    }
}
