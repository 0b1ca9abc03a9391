//! `Engine`: the compact procedural surface (§6) — `store`, `retrieve`,
//! `retrieve_range`, `delete`, `health`, `repair`, `collect_garbage` —
//! composed from every other module the way the teacher's `Pipeline` owns
//! storage and registries.

use crate::chunker::{chunk_count, Chunker};
use crate::codec::Codec;
use crate::collaborators::NodeDirectory;
use crate::config::Config;
use crate::crypto::{EncryptionKey, EncryptionProvider};
use crate::distributor::Distributor;
use crate::error::{CdeError, Result};
use crate::gc::{GarbageCollector, GcReport};
use crate::health::{ChunkHealth, HealthReport, HealthScanner};
use crate::index::FragmentIndex;
use crate::metrics::Metrics;
use crate::pipeline::{CancellationToken, ChunkJob, Pipeline, Stage};
use crate::retriever::{range_to_chunks, shard_key, ChunkCache, Retriever};
use crate::types::{ChunkIndex, ChunkRow, ContentId, ContentRow, PlacementRow, Policy, ShardRow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Cursor;
use std::ops::Range;
use std::sync::Arc;
use tracing::{info, instrument};

/// Top-level entry point for the Content Durability Engine.
pub struct Engine {
    config: Config,
    index: Arc<FragmentIndex>,
    directory: Arc<dyn NodeDirectory>,
    encryption: Arc<dyn EncryptionProvider>,
    retriever: Retriever,
    scanner: HealthScanner,
    gc: GarbageCollector,
    metrics: Arc<Metrics>,
}

impl Engine {
    pub fn new(config: Config, directory: Arc<dyn NodeDirectory>, encryption: Arc<dyn EncryptionProvider>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CdeError::ValidationRejected { reason: e.to_string() })?;

        let index = Arc::new(FragmentIndex::new());
        let cache = Arc::new(ChunkCache::new(config.chunk_cache_bytes));
        let metrics = Arc::new(Metrics::default());
        let retriever = Retriever::new(index.clone(), directory.clone(), cache, metrics.clone());
        let scanner = HealthScanner::new(index.clone(), directory.clone(), config.clone());
        let gc = GarbageCollector::new(index.clone(), directory.clone());

        Ok(Self {
            config,
            index,
            directory,
            encryption,
            retriever,
            scanner,
            gc,
            metrics,
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Ingest `data` as a new content of `content_type`, encrypting with
    /// `key`, splitting per the resolved policy, encoding, and distributing
    /// every shard through the §4.3 pipeline before the index commit makes
    /// the content visible. `cancellation` is checked between every stage;
    /// a cancelled store never reaches `commit_ingest`, so no partial
    /// content becomes visible.
    #[instrument(skip(self, data, key, cancellation))]
    pub async fn store(
        &self,
        content_type: &str,
        data: &[u8],
        key: &EncryptionKey,
        cancellation: &CancellationToken,
    ) -> Result<ContentId> {
        let policy = self.config.policies.policy_for(content_type);
        let content_id = ContentId::from_content(data);

        let mut jobs = Vec::new();
        let mut payload_lengths: HashMap<ChunkIndex, u32> = HashMap::new();
        let chunker = Chunker::new(Cursor::new(data), &policy);
        for result in chunker {
            let chunk = result.map_err(CdeError::Io)?;
            payload_lengths.insert(chunk.index, (chunk.data.len() - chunk.padding) as u32);
            jobs.push(ChunkJob::new(content_id, chunk.index, chunk.data));
        }

        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(EncryptStage {
                encryption: self.encryption.clone(),
                // `EncryptionKey` zeroizes on drop and isn't `Clone`; the stage
                // owns an independent copy of the same bytes rather than the
                // caller's key.
                key: EncryptionKey::new(*key.as_bytes()),
            }),
            Arc::new(EncodeStage {
                codec: Codec::new(),
                policy,
            }),
            Arc::new(DistributeStage {
                directory: self.directory.clone(),
                policy,
            }),
        ];
        let pipeline = Pipeline::new(stages, self.config.workers);
        let finished = pipeline.run(jobs, cancellation).await?;

        let mut chunk_rows = Vec::new();
        let mut shard_rows = Vec::new();
        let mut placement_rows = Vec::new();

        for job in finished {
            let shards = job.shards.expect("encode stage fills shards");
            let placements = job.placements.expect("distribute stage fills placements");
            for (shard_index, (shard, node)) in shards.iter().zip(placements.iter()).enumerate() {
                shard_rows.push(ShardRow {
                    content_id,
                    chunk_index: job.chunk_index,
                    shard_index: shard_index as u16,
                    role: policy.role_of(shard_index as u16),
                    byte_length: shard.len() as u32,
                    sink_id: node.node_id.as_bytes().to_vec(),
                    content_hash: *blake3::hash(shard).as_bytes(),
                });
                placement_rows.push(PlacementRow {
                    content_id,
                    chunk_index: job.chunk_index,
                    shard_index: shard_index as u16,
                    node_id: node.node_id.clone(),
                    region: node.region.clone(),
                    placed_at: 0,
                    last_verified: 0,
                });
            }
            chunk_rows.push(ChunkRow {
                content_id,
                chunk_index: job.chunk_index,
                payload_length: payload_lengths[&job.chunk_index],
            });
        }

        let content_row = ContentRow {
            content_id,
            byte_length: data.len() as u64,
            content_type: content_type.to_string(),
            created_at: 0,
            policy,
            chunk_count: chunk_count(&policy, data.len() as u64),
        };

        self.index
            .commit_ingest(content_row, chunk_rows, shard_rows, placement_rows)?;
        self.metrics.record_ingest();
        info!(%content_id, "content ingested");
        Ok(content_id)
    }

    /// Fetch one chunk's shards, reconstruct if needed, and decrypt it,
    /// trimmed back to its recorded payload length.
    async fn fetch_and_decrypt_chunk(
        &self,
        content_id: &ContentId,
        chunk_index: ChunkIndex,
        policy: &Policy,
        key: &EncryptionKey,
    ) -> Result<Vec<u8>> {
        let ciphertext = self.retriever.fetch_chunk(content_id, chunk_index, policy).await?;
        let chunk_row = self
            .index
            .chunk(content_id, chunk_index)
            .ok_or(CdeError::NotFound(*content_id))?;
        let trimmed_len = ciphertext.len().min(chunk_row.payload_length as usize + AES_GCM_TAG_LEN);
        let trimmed = &ciphertext[..trimmed_len];
        self.encryption.decrypt_chunk(content_id, chunk_index, key, trimmed)
    }

    /// Reassemble and decrypt a full content.
    #[instrument(skip(self, key, cancellation))]
    pub async fn retrieve(
        &self,
        content_id: &ContentId,
        key: &EncryptionKey,
        cancellation: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let content = self.index.content(content_id).ok_or(CdeError::NotFound(*content_id))?;
        let mut out = Vec::with_capacity(content.byte_length as usize);

        for chunk_index in 0..content.chunk_count {
            if cancellation.is_cancelled() {
                return Err(CdeError::Cancelled);
            }
            let plaintext = self
                .fetch_and_decrypt_chunk(content_id, chunk_index, &content.policy, key)
                .await?;
            out.extend_from_slice(&plaintext);
        }

        self.metrics.record_retrieve();
        Ok(out)
    }

    /// Reassemble and decrypt only the bytes of `range` (§4.6, §6
    /// `Retrieve(content_id, byte_range?)`): only the first and last chunks
    /// touched by the range are trimmed, every chunk in between is returned
    /// whole.
    #[instrument(skip(self, key, cancellation))]
    pub async fn retrieve_range(
        &self,
        content_id: &ContentId,
        key: &EncryptionKey,
        range: Range<u64>,
        cancellation: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let content = self.index.content(content_id).ok_or(CdeError::NotFound(*content_id))?;
        if range.start >= range.end || range.end > content.byte_length {
            return Err(CdeError::ValidationRejected {
                reason: format!(
                    "byte range {}..{} out of bounds for content of length {}",
                    range.start, range.end, content.byte_length
                ),
            });
        }

        let span = range_to_chunks(&content.policy, range.start, range.end);
        let mut out = Vec::with_capacity((range.end - range.start) as usize);

        for chunk_index in span.first_chunk..=span.last_chunk {
            if cancellation.is_cancelled() {
                return Err(CdeError::Cancelled);
            }
            let plaintext = self
                .fetch_and_decrypt_chunk(content_id, chunk_index, &content.policy, key)
                .await?;

            let is_first = chunk_index == span.first_chunk;
            let is_last = chunk_index == span.last_chunk;
            let lower = if is_first { span.skip_in_first as usize } else { 0 };
            let upper = match (is_first, is_last) {
                (true, true) => lower + span.take_in_last as usize,
                (false, true) => span.take_in_last as usize,
                _ => plaintext.len(),
            };
            let upper = upper.min(plaintext.len());
            out.extend_from_slice(&plaintext[lower..upper]);
        }

        self.metrics.record_retrieve();
        Ok(out)
    }

    /// Delete every shard of a content and remove it from the index.
    pub async fn delete(&self, content_id: &ContentId) -> Result<()> {
        let content = self.index.content(content_id).ok_or(CdeError::NotFound(*content_id))?;
        for chunk_index in 0..content.chunk_count {
            for placement in self.index.placements_for_chunk(content_id, chunk_index) {
                if let Ok(sink) = self.directory.sink_for(&placement.node_id).await {
                    let key = shard_key(content_id, chunk_index, placement.shard_index);
                    let _ = sink.delete(&key).await;
                }
            }
        }
        self.index.remove_content(content_id);
        Ok(())
    }

    /// Run one health scan pass over the whole index.
    pub async fn health(&self) -> HealthReport {
        self.scanner.scan().await
    }

    /// Repair every degraded or critical chunk a prior [`Engine::health`]
    /// scan reported. Stops early, returning whatever repairs already
    /// completed, once `cancellation` fires.
    pub async fn repair(&self, findings: &[ChunkHealth], cancellation: &CancellationToken) -> Vec<ContentId> {
        let repaired = self.scanner.repair(findings, cancellation).await;
        for _ in &repaired {
            self.metrics.record_repair();
        }
        repaired
    }

    /// Sweep every reachable node for shard keys no longer referenced by the index.
    pub async fn collect_garbage(&self) -> Result<GcReport> {
        self.gc.run().await
    }
}

const AES_GCM_TAG_LEN: usize = 16;

/// A throwaway policy with the same `(k, m)` shape but `chunk_size` rounded
/// up to the next multiple of `k` that fits `ciphertext_len`, used only for
/// the codec call — the persisted [`crate::types::Policy`] keeps the
/// caller-facing plaintext chunk size.
fn coded_policy_for(policy: &Policy, ciphertext_len: usize) -> Result<Policy> {
    let k = policy.k as usize;
    let target = ciphertext_len.div_ceil(k) * k;
    Policy::with_reliability(policy.k, policy.m, target as u32, policy.min_reliability, policy.repair_headroom)
}

/// §4.3 encrypt stage: AEAD-encrypts a chunk's plaintext under the content's key.
struct EncryptStage {
    encryption: Arc<dyn EncryptionProvider>,
    key: EncryptionKey,
}

#[async_trait]
impl Stage for EncryptStage {
    fn name(&self) -> &'static str {
        "encrypt"
    }

    async fn run(&self, mut job: ChunkJob) -> Result<ChunkJob> {
        let ciphertext = self
            .encryption
            .encrypt_chunk(&job.content_id, job.chunk_index, &self.key, &job.plaintext)?;
        job.ciphertext = Some(ciphertext);
        Ok(job)
    }
}

/// §4.3 encode stage: pads the ciphertext to the codec's shard boundary and
/// splits it into `k + m` Reed-Solomon shards.
struct EncodeStage {
    codec: Codec,
    policy: Policy,
}

#[async_trait]
impl Stage for EncodeStage {
    fn name(&self) -> &'static str {
        "encode"
    }

    async fn run(&self, mut job: ChunkJob) -> Result<ChunkJob> {
        let ciphertext = job
            .ciphertext
            .take()
            .expect("encrypt stage runs before encode");

        // AES-GCM's tag adds a fixed 16 bytes to every chunk (the chunker
        // already padded plaintext to a constant `chunk_size`, so every
        // ciphertext is the same length); round that up to a clean multiple
        // of k so the codec's systematic split applies.
        let coded_policy = coded_policy_for(&self.policy, ciphertext.len())?;
        let mut padded = ciphertext;
        padded.resize(coded_policy.chunk_size as usize, 0);
        job.shards = Some(self.codec.encode(&coded_policy, &padded)?);
        Ok(job)
    }
}

/// §4.3 distribute stage: selects placement nodes for a chunk's shards and
/// writes each shard to its chosen node's sink.
struct DistributeStage {
    directory: Arc<dyn NodeDirectory>,
    policy: Policy,
}

#[async_trait]
impl Stage for DistributeStage {
    fn name(&self) -> &'static str {
        "distribute"
    }

    async fn run(&self, mut job: ChunkJob) -> Result<ChunkJob> {
        let distributor = Distributor::new(self.directory.as_ref());
        let placements = distributor
            .select_placement(&job.content_id, job.chunk_index, &self.policy)
            .await?;

        let shards = job.shards.as_ref().expect("encode stage runs before distribute");
        for (shard_index, (shard, node)) in shards.iter().zip(placements.iter()).enumerate() {
            let sink = self.directory.sink_for(&node.node_id).await?;
            let key = shard_key(&job.content_id, job.chunk_index, shard_index as u16);
            sink.put(&key, shard).await?;
        }

        job.placements = Some(placements);
        Ok(job)
    }
}
