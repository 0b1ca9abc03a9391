//! Health scan and repair loop (§4.7).
//!
//! Classifies each chunk as healthy, degraded, or critical by sampling its
//! placements — a liveness-only `has` check for most shards, a full blake3
//! verification for a `1-in-N` sample per scan pass — then dispatches repair
//! for anything below the policy's repair headroom.

use crate::codec::Codec;
use crate::collaborators::NodeDirectory;
use crate::config::Config;
use crate::distributor::Distributor;
use crate::index::FragmentIndex;
use crate::pipeline::CancellationToken;
use crate::retriever::shard_key;
use crate::types::{ChunkIndex, ContentId, PlacementRow, Policy};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of checking a single chunk's shard set against its policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// At least `k + repair_headroom` shards are live.
    Healthy,
    /// Fewer than the headroom but at least `k` shards are live — still
    /// reconstructable, repair is advisory rather than urgent.
    Degraded,
    /// Fewer than `k` shards are live — reconstruction would fail right now.
    Critical,
}

/// A single chunk's health result.
#[derive(Debug, Clone)]
pub struct ChunkHealth {
    pub content_id: ContentId,
    pub chunk_index: ChunkIndex,
    pub live_shards: usize,
    pub total_shards: usize,
    pub status: HealthStatus,
}

/// Aggregate result of one scan pass.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub healthy: usize,
    pub degraded: usize,
    pub critical: usize,
    pub chunks: Vec<ChunkHealth>,
}

fn classify(live: usize, policy: &Policy) -> HealthStatus {
    let k = policy.k as usize;
    let headroom = k + policy.repair_headroom as usize;
    if live >= headroom {
        HealthStatus::Healthy
    } else if live >= k {
        HealthStatus::Degraded
    } else {
        HealthStatus::Critical
    }
}

/// Scans the index and reports on, and optionally repairs, chunk health.
pub struct HealthScanner {
    index: Arc<FragmentIndex>,
    directory: Arc<dyn NodeDirectory>,
    codec: Codec,
    config: Config,
    scan_pass: std::sync::atomic::AtomicU32,
}

impl HealthScanner {
    pub fn new(index: Arc<FragmentIndex>, directory: Arc<dyn NodeDirectory>, config: Config) -> Self {
        Self {
            index,
            directory,
            codec: Codec::new(),
            config,
            scan_pass: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Run one scan pass over every content/chunk in the index.
    pub async fn scan(&self) -> HealthReport {
        let pass = self
            .scan_pass
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut report = HealthReport::default();

        for content_id in self.index.all_content_ids() {
            let Some(content) = self.index.content(&content_id) else {
                continue;
            };
            for chunk_index in 0..content.chunk_count {
                let health = self
                    .check_chunk(&content_id, chunk_index, &content.policy, pass)
                    .await;
                match health.status {
                    HealthStatus::Healthy => report.healthy += 1,
                    HealthStatus::Degraded => report.degraded += 1,
                    HealthStatus::Critical => report.critical += 1,
                }
                report.chunks.push(health);
            }
        }

        info!(
            healthy = report.healthy,
            degraded = report.degraded,
            critical = report.critical,
            "health scan complete"
        );
        report
    }

    async fn check_chunk(
        &self,
        content_id: &ContentId,
        chunk_index: ChunkIndex,
        policy: &Policy,
        pass: u32,
    ) -> ChunkHealth {
        let placements = self.index.placements_for_chunk(content_id, chunk_index);
        let mut live = 0usize;

        for (i, placement) in placements.iter().enumerate() {
            let sample_full_hash =
                (chunk_index as u64 + i as u64 + pass as u64) % self.config.verify_sample_rate as u64 == 0;

            let Ok(sink) = self.directory.sink_for(&placement.node_id).await else {
                continue;
            };
            let key = shard_key(content_id, chunk_index, placement.shard_index);

            let alive = if sample_full_hash {
                match sink.get(&key).await {
                    Ok(bytes) => {
                        let row = self
                            .index
                            .shards_for_chunk(content_id, chunk_index)
                            .into_iter()
                            .find(|s| s.shard_index == placement.shard_index);
                        row.map(|r| self.codec.verify(&bytes, &r.content_hash)).unwrap_or(true)
                    }
                    Err(_) => false,
                }
            } else {
                sink.has(&key).await.unwrap_or(false)
            };

            if alive {
                live += 1;
            }
        }

        ChunkHealth {
            content_id: *content_id,
            chunk_index,
            live_shards: live,
            total_shards: placements.len().max(policy.total_shards() as usize),
            status: classify(live, policy),
        }
    }

    /// Repair every degraded or critical chunk found by a prior scan. This
    /// reconstructs the chunk from its surviving shards, re-derives the
    /// missing ones, and re-places them via the distributor. Idempotent:
    /// repairing an already-healthy chunk is a no-op. Stops early, returning
    /// whatever repairs already completed, once `cancellation` fires.
    pub async fn repair(&self, findings: &[ChunkHealth], cancellation: &CancellationToken) -> Vec<ContentId> {
        let mut repaired = Vec::new();
        for finding in findings {
            if cancellation.is_cancelled() {
                break;
            }
            if finding.status == HealthStatus::Healthy {
                continue;
            }
            match self.repair_chunk(finding).await {
                Ok(()) => repaired.push(finding.content_id),
                Err(e) => warn!(
                    content_id = %finding.content_id,
                    chunk_index = finding.chunk_index,
                    error = %e,
                    "repair failed"
                ),
            }
        }
        repaired
    }

    async fn repair_chunk(&self, finding: &ChunkHealth) -> crate::error::Result<()> {
        let Some(content) = self.index.content(&finding.content_id) else {
            return Ok(());
        };
        let policy = content.policy;
        let n = policy.total_shards() as usize;
        let k = policy.k as usize;

        let placements = self
            .index
            .placements_for_chunk(&finding.content_id, finding.chunk_index);
        let mut present: Vec<Option<Vec<u8>>> = vec![None; n];
        for placement in &placements {
            let Ok(sink) = self.directory.sink_for(&placement.node_id).await else {
                continue;
            };
            let key = shard_key(&finding.content_id, finding.chunk_index, placement.shard_index);
            if let Ok(bytes) = sink.get(&key).await {
                present[placement.shard_index as usize] = Some(bytes);
            }
        }

        let live = present.iter().filter(|s| s.is_some()).count();
        if live < k {
            return Err(crate::error::CdeError::InsufficientShards {
                content_id: finding.content_id,
                chunk_index: finding.chunk_index,
                have: live,
                need: k,
            });
        }

        // Slots with no live shard bytes right now, captured before
        // `reconstruct` fills every entry of `present` in place.
        let missing: Vec<usize> = (0..n).filter(|&i| present[i].is_none()).collect();
        if missing.is_empty() {
            return Ok(());
        }

        let placement_by_shard: std::collections::HashMap<u16, String> = placements
            .iter()
            .map(|p| (p.shard_index, p.node_id.clone()))
            .collect();

        self.codec.reconstruct(&policy, &mut present)?;

        let distributor = Distributor::new(self.directory.as_ref());
        let new_nodes = distributor
            .select_placement(&finding.content_id, finding.chunk_index, &policy)
            .await?;

        for (slot, node) in missing.iter().zip(new_nodes.iter()) {
            let shard = present[*slot].as_ref().expect("reconstruct filled every slot");
            let sink = self.directory.sink_for(&node.node_id).await?;
            let key = shard_key(&finding.content_id, finding.chunk_index, *slot as u16);
            sink.put(&key, shard).await?;

            let shard_index = *slot as u16;
            let mut expected = placement_by_shard.get(&shard_index).cloned();
            for _ in 0..5 {
                let placement = PlacementRow {
                    content_id: finding.content_id,
                    chunk_index: finding.chunk_index,
                    shard_index,
                    node_id: node.node_id.clone(),
                    region: node.region.clone(),
                    placed_at: 0,
                    last_verified: 0,
                };
                match self.index.replace_placement(expected.as_deref(), placement) {
                    Ok(()) => break,
                    Err(crate::error::CdeError::IndexConflict { .. }) => {
                        let current = self
                            .index
                            .placements_for_chunk(&finding.content_id, finding.chunk_index)
                            .into_iter()
                            .find(|p| p.shard_index == shard_index)
                            .map(|p| p.node_id);
                        if current == expected {
                            break;
                        }
                        expected = current;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }
}
