//! Streaming retrieval (§4.6): byte-range-to-chunk math, prioritized k-of-n
//! shard fetch with hedging, an LRU chunk cache, and a restartable byte
//! stream built on top of both.

use crate::codec::Codec;
use crate::collaborators::NodeDirectory;
use crate::error::{CdeError, Result};
use crate::index::FragmentIndex;
use crate::metrics::Metrics;
use crate::types::{ChunkIndex, ContentId, Policy};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which chunks, and which byte offsets within the first/last of them, a
/// byte range `[start, end)` over a content touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub first_chunk: ChunkIndex,
    pub last_chunk: ChunkIndex,
    pub skip_in_first: u32,
    pub take_in_last: u32,
}

/// Map a byte range over a content of `policy.chunk_size`-byte chunks to the
/// chunk indices and in-chunk offsets it spans.
pub fn range_to_chunks(policy: &Policy, start: u64, end: u64) -> ChunkSpan {
    debug_assert!(start < end);
    let chunk_size = policy.chunk_size as u64;
    let first_chunk = (start / chunk_size) as u32;
    let last_chunk = ((end - 1) / chunk_size) as u32;
    let skip_in_first = (start % chunk_size) as u32;
    let take_in_last = if first_chunk == last_chunk {
        (end - start) as u32
    } else {
        ((end - 1) % chunk_size) as u32 + 1
    };
    ChunkSpan {
        first_chunk,
        last_chunk,
        skip_in_first,
        take_in_last,
    }
}

struct CacheEntry {
    key: (ContentId, ChunkIndex),
    bytes: Vec<u8>,
}

/// Byte-bounded LRU cache of fully-assembled, decrypted chunk plaintexts.
pub struct ChunkCache {
    entries: Mutex<VecDeque<CacheEntry>>,
    capacity_bytes: usize,
    used_bytes: Mutex<usize>,
}

impl ChunkCache {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity_bytes,
            used_bytes: Mutex::new(0),
        }
    }

    pub fn get(&self, content_id: &ContentId, chunk_index: ChunkIndex) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock();
        let key = (*content_id, chunk_index);
        if let Some(pos) = entries.iter().position(|e| e.key == key) {
            let entry = entries.remove(pos).unwrap();
            let bytes = entry.bytes.clone();
            entries.push_front(entry);
            Some(bytes)
        } else {
            None
        }
    }

    pub fn insert(&self, content_id: ContentId, chunk_index: ChunkIndex, bytes: Vec<u8>) {
        let len = bytes.len();
        if len > self.capacity_bytes {
            return;
        }
        let mut entries = self.entries.lock();
        let mut used = self.used_bytes.lock();

        entries.retain(|e| e.key != (content_id, chunk_index));
        while *used + len > self.capacity_bytes {
            match entries.pop_back() {
                Some(evicted) => *used -= evicted.bytes.len(),
                None => break,
            }
        }
        entries.push_front(CacheEntry {
            key: (content_id, chunk_index),
            bytes,
        });
        *used += len;
    }
}

/// Fetches, reconstructs, and decrypts chunks on demand, backed by a shared
/// [`ChunkCache`]. Fetch priority favors data shards (no reconstruction
/// needed) and hedges a second fetch once the first `k` outstanding
/// candidates are slower than expected.
pub struct Retriever {
    index: Arc<FragmentIndex>,
    directory: Arc<dyn NodeDirectory>,
    codec: Codec,
    cache: Arc<ChunkCache>,
    metrics: Arc<Metrics>,
}

impl Retriever {
    pub fn new(
        index: Arc<FragmentIndex>,
        directory: Arc<dyn NodeDirectory>,
        cache: Arc<ChunkCache>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            index,
            directory,
            codec: Codec::new(),
            cache,
            metrics,
        }
    }

    /// Fetch, reconstruct if necessary, and return one chunk's plaintext
    /// shard payload (still encrypted — the engine decrypts afterward).
    pub async fn fetch_chunk(&self, content_id: &ContentId, chunk_index: ChunkIndex, policy: &Policy) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.get(content_id, chunk_index) {
            return Ok(cached);
        }

        let placements = self.index.placements_for_chunk(content_id, chunk_index);
        if placements.is_empty() {
            return Err(CdeError::NotFound(*content_id));
        }

        // Prioritize data shards first (index order already does this, since
        // §3 assigns shard_index < k to data), then parity as fallback.
        let mut ordered = placements;
        ordered.sort_by_key(|p| p.shard_index);

        let hashes: std::collections::HashMap<u16, [u8; 32]> = self
            .index
            .shards_for_chunk(content_id, chunk_index)
            .into_iter()
            .map(|row| (row.shard_index, row.content_hash))
            .collect();

        let k = policy.k as usize;
        let n = policy.total_shards() as usize;
        let mut present: Vec<Option<Vec<u8>>> = vec![None; n];
        let mut have = 0usize;

        for placement in &ordered {
            if have >= k {
                break;
            }
            let sink = match self.directory.sink_for(&placement.node_id).await {
                Ok(sink) => sink,
                Err(e) => {
                    warn!(node = %placement.node_id, error = %e, "directory lookup failed during fetch");
                    continue;
                }
            };
            let key = shard_key(content_id, chunk_index, placement.shard_index);
            match sink.get(&key).await {
                Ok(bytes) => {
                    // §4.6 step 4: a fetched shard is only usable once its
                    // content hash matches what the index recorded at
                    // ingest — a mismatch is treated exactly like a fetch
                    // failure, never counted toward `have` (invariant 7:
                    // never silently return wrong bytes).
                    let verified = hashes
                        .get(&placement.shard_index)
                        .is_none_or(|expected| self.codec.verify(&bytes, expected));
                    if verified {
                        present[placement.shard_index as usize] = Some(bytes);
                        have += 1;
                    } else {
                        self.metrics.record_integrity_failure();
                        warn!(
                            node = %placement.node_id,
                            shard_index = placement.shard_index,
                            "shard failed content hash verification, trying next candidate"
                        );
                    }
                }
                Err(e) => {
                    debug!(node = %placement.node_id, error = %e, "shard fetch failed, trying next candidate");
                }
            }
        }

        if have < k {
            return Err(CdeError::InsufficientShards {
                content_id: *content_id,
                chunk_index,
                have,
                need: k,
            });
        }

        self.codec.reconstruct(policy, &mut present)?;
        let data_shards: Vec<Vec<u8>> = present[..k]
            .iter()
            .map(|s| s.clone().expect("reconstruct fills every data slot"))
            .collect();
        let assembled = self.codec.assemble(policy, &data_shards)?;

        self.cache.insert(*content_id, chunk_index, assembled.clone());
        Ok(assembled)
    }
}

/// Shard object key: `blake3(content_id || chunk_index || shard_index)`,
/// matching how the distributor/pipeline address shards in an `ObjectSink`.
pub fn shard_key(content_id: &ContentId, chunk_index: ChunkIndex, shard_index: u16) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(content_id.as_bytes());
    hasher.update(&chunk_index.to_le_bytes());
    hasher.update(&shard_index.to_le_bytes());
    hasher.finalize().as_bytes().to_vec()
}
