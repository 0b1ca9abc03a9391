//! Fragment Index (§4.4): the transactional source of truth mapping
//! content → chunk → shard → placement.
//!
//! The reference implementation is an in-process sorted map behind a
//! `parking_lot::RwLock`, matching the teacher's concurrency idiom rather
//! than pulling in an embedded-KV dependency the teacher never used.

use crate::error::{CdeError, Result};
use crate::types::{ChunkIndex, ChunkRow, ContentId, ContentRow, PlacementRow, ShardIndex, ShardRow};
use parking_lot::RwLock;
use std::collections::BTreeMap;

type ShardKey = (ContentId, ChunkIndex, ShardIndex);

#[derive(Default)]
struct Tables {
    content: BTreeMap<ContentId, ContentRow>,
    chunks: BTreeMap<(ContentId, ChunkIndex), ChunkRow>,
    shards: BTreeMap<ShardKey, ShardRow>,
    placements: BTreeMap<ShardKey, PlacementRow>,
}

/// The Fragment Index. Cloning is cheap (shares the lock); all mutation goes
/// through `commit_ingest` or `replace_placement` so readers never observe a
/// half-written content.
#[derive(Default)]
pub struct FragmentIndex {
    tables: RwLock<Tables>,
}

impl FragmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically register a content's rows, its chunks, shards, and initial
    /// placements in one commit. Either all rows land or none do.
    pub fn commit_ingest(
        &self,
        content: ContentRow,
        chunks: Vec<ChunkRow>,
        shards: Vec<ShardRow>,
        placements: Vec<PlacementRow>,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.content.contains_key(&content.content_id) {
            return Err(CdeError::IndexConflict {
                content_id: content.content_id,
            });
        }

        let content_id = content.content_id;
        tables.content.insert(content_id, content);
        for chunk in chunks {
            tables.chunks.insert((chunk.content_id, chunk.chunk_index), chunk);
        }
        for shard in shards {
            let key = (shard.content_id, shard.chunk_index, shard.shard_index);
            tables.shards.insert(key, shard);
        }
        for placement in placements {
            let key = (
                placement.content_id,
                placement.chunk_index,
                placement.shard_index,
            );
            tables.placements.insert(key, placement);
        }
        Ok(())
    }

    pub fn content(&self, content_id: &ContentId) -> Option<ContentRow> {
        self.tables.read().content.get(content_id).cloned()
    }

    pub fn chunk(&self, content_id: &ContentId, chunk_index: ChunkIndex) -> Option<ChunkRow> {
        self.tables
            .read()
            .chunks
            .get(&(*content_id, chunk_index))
            .cloned()
    }

    pub fn shards_for_chunk(&self, content_id: &ContentId, chunk_index: ChunkIndex) -> Vec<ShardRow> {
        self.tables
            .read()
            .shards
            .range((*content_id, chunk_index, 0)..(*content_id, chunk_index + 1, 0))
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn placements_for_chunk(
        &self,
        content_id: &ContentId,
        chunk_index: ChunkIndex,
    ) -> Vec<PlacementRow> {
        self.tables
            .read()
            .placements
            .range((*content_id, chunk_index, 0)..(*content_id, chunk_index + 1, 0))
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Compare-and-swap a single shard's placement: succeeds only if the
    /// caller's view of the current placement (by `node_id`) still matches,
    /// so two concurrent repairs can't both "win" and double-place a shard.
    pub fn replace_placement(
        &self,
        expected_node_id: Option<&str>,
        new_placement: PlacementRow,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        let key = (
            new_placement.content_id,
            new_placement.chunk_index,
            new_placement.shard_index,
        );
        let current = tables.placements.get(&key).map(|p| p.node_id.as_str());
        if current != expected_node_id {
            return Err(CdeError::IndexConflict {
                content_id: new_placement.content_id,
            });
        }
        tables.placements.insert(key, new_placement);
        Ok(())
    }

    pub fn remove_content(&self, content_id: &ContentId) {
        let mut tables = self.tables.write();
        tables.content.remove(content_id);
        tables.chunks.retain(|(cid, _), _| cid != content_id);
        tables.shards.retain(|(cid, _, _), _| cid != content_id);
        tables.placements.retain(|(cid, _, _), _| cid != content_id);
    }

    /// Every content id currently known to the index (used by garbage
    /// collection's liveness mark phase).
    pub fn all_content_ids(&self) -> Vec<ContentId> {
        self.tables.read().content.keys().copied().collect()
    }

    pub fn all_placements(&self) -> Vec<PlacementRow> {
        self.tables.read().placements.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Policy, ShardRole};

    fn sample_content(id: ContentId) -> ContentRow {
        ContentRow {
            content_id: id,
            byte_length: 100,
            content_type: "application/octet-stream".to_string(),
            created_at: 0,
            policy: Policy::new(2, 1, 4).unwrap(),
            chunk_count: 1,
        }
    }

    #[test]
    fn commit_ingest_is_all_or_nothing_against_duplicates() {
        let index = FragmentIndex::new();
        let id = ContentId::new([1; 16]);
        index
            .commit_ingest(sample_content(id), vec![], vec![], vec![])
            .unwrap();

        let err = index
            .commit_ingest(sample_content(id), vec![], vec![], vec![])
            .unwrap_err();
        assert!(matches!(err, CdeError::IndexConflict { .. }));
    }

    #[test]
    fn replace_placement_cas_rejects_stale_expectation() {
        let index = FragmentIndex::new();
        let id = ContentId::new([2; 16]);
        let placement = PlacementRow {
            content_id: id,
            chunk_index: 0,
            shard_index: 0,
            node_id: "n1".to_string(),
            region: "eu".to_string(),
            placed_at: 0,
            last_verified: 0,
        };
        index
            .commit_ingest(sample_content(id), vec![], vec![], vec![placement.clone()])
            .unwrap();

        let mut updated = placement.clone();
        updated.node_id = "n2".to_string();

        // Wrong expectation: should fail.
        assert!(index.replace_placement(Some("wrong"), updated.clone()).is_err());
        // Correct expectation: should succeed.
        index.replace_placement(Some("n1"), updated).unwrap();
        let placements = index.placements_for_chunk(&id, 0);
        assert_eq!(placements[0].node_id, "n2");
    }

    #[test]
    fn shards_for_chunk_filters_by_content_and_index() {
        let index = FragmentIndex::new();
        let id = ContentId::new([3; 16]);
        let shard = ShardRow {
            content_id: id,
            chunk_index: 0,
            shard_index: 0,
            role: ShardRole::Data,
            byte_length: 4,
            sink_id: vec![9],
            content_hash: [0; 32],
        };
        index
            .commit_ingest(sample_content(id), vec![], vec![shard], vec![])
            .unwrap();
        assert_eq!(index.shards_for_chunk(&id, 0).len(), 1);
        assert_eq!(index.shards_for_chunk(&id, 1).len(), 0);
    }
}
