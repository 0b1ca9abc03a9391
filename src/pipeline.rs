//! Ordered-stage pipeline executor (§4.3).
//!
//! Ingest moves a chunk through five named stages — validate, encrypt,
//! encode, distribute, index_commit — in that order. Stages marked
//! parallelisable run across a bounded worker pool; others run one job at a
//! time. A bounded channel of depth `2W` sits between every stage so a slow
//! downstream stage applies back-pressure instead of letting the pipeline
//! buffer unboundedly, and a shared cancellation flag lets an in-flight
//! ingest be aborted between stages.

use crate::error::Result;
use crate::types::{ChunkIndex, ContentId, NodeInfo};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One chunk's worth of state as it threads through the pipeline, filled in
/// progressively by each stage.
#[derive(Debug, Clone)]
pub struct ChunkJob {
    pub content_id: ContentId,
    pub chunk_index: ChunkIndex,
    pub plaintext: Vec<u8>,
    pub ciphertext: Option<Vec<u8>>,
    pub shards: Option<Vec<Vec<u8>>>,
    pub placements: Option<Vec<NodeInfo>>,
}

impl ChunkJob {
    pub fn new(content_id: ContentId, chunk_index: ChunkIndex, plaintext: Vec<u8>) -> Self {
        Self {
            content_id,
            chunk_index,
            plaintext,
            ciphertext: None,
            shards: None,
            placements: None,
        }
    }
}

/// A single named stage in the ingest pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether independent jobs may run through this stage concurrently.
    /// `false` for stages with a process-wide resource to serialize on (the
    /// index commit is the canonical example).
    fn parallelisable(&self) -> bool {
        true
    }

    async fn run(&self, job: ChunkJob) -> Result<ChunkJob>;
}

/// Cooperative cancellation flag shared across every stage of one ingest.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes a fixed sequence of [`Stage`]s over a batch of jobs.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    workers: usize,
}

impl Pipeline {
    /// `workers` bounds both the parallel-stage worker pool size and the
    /// inter-stage channel depth (`2 * workers`).
    pub fn new(stages: Vec<Arc<dyn Stage>>, workers: usize) -> Self {
        Self {
            stages,
            workers: workers.max(1),
        }
    }

    /// Run every job through every stage in order. Returns the first error
    /// encountered; jobs already in flight for that stage are allowed to
    /// finish, but no further stage runs afterward.
    pub async fn run(&self, jobs: Vec<ChunkJob>, cancellation: &CancellationToken) -> Result<Vec<ChunkJob>> {
        let mut current = jobs;
        for stage in &self.stages {
            if cancellation.is_cancelled() {
                return Err(crate::error::CdeError::Cancelled);
            }
            debug!(stage = stage.name(), jobs = current.len(), "running pipeline stage");
            current = if stage.parallelisable() {
                self.run_parallel(stage.clone(), current, cancellation).await?
            } else {
                self.run_serial(stage.as_ref(), current, cancellation).await?
            };
        }
        Ok(current)
    }

    async fn run_serial(
        &self,
        stage: &dyn Stage,
        jobs: Vec<ChunkJob>,
        cancellation: &CancellationToken,
    ) -> Result<Vec<ChunkJob>> {
        let mut out = Vec::with_capacity(jobs.len());
        for job in jobs {
            if cancellation.is_cancelled() {
                return Err(crate::error::CdeError::Cancelled);
            }
            out.push(stage.run(job).await?);
        }
        Ok(out)
    }

    async fn run_parallel(
        &self,
        stage: Arc<dyn Stage>,
        jobs: Vec<ChunkJob>,
        cancellation: &CancellationToken,
    ) -> Result<Vec<ChunkJob>> {
        let channel_depth = self.workers * 2;
        let (tx, rx) = mpsc::channel::<(usize, ChunkJob)>(channel_depth);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let rx = rx.clone();
            let stage = stage.clone();
            let cancellation = cancellation.clone();
            handles.push(tokio::spawn(async move {
                let mut results = Vec::new();
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some((index, job)) = next else { break };
                    if cancellation.is_cancelled() {
                        results.push((index, Err(crate::error::CdeError::Cancelled)));
                        continue;
                    }
                    let result = stage.run(job).await;
                    if let Err(ref e) = result {
                        warn!(stage = stage.name(), error = %e, "stage failed");
                    }
                    results.push((index, result));
                }
                results
            }));
        }

        let total = jobs.len();
        for (index, job) in jobs.into_iter().enumerate() {
            if tx.send((index, job)).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut ordered: Vec<Option<ChunkJob>> = (0..total).map(|_| None).collect();
        for handle in handles {
            let results = handle.await.map_err(|_| crate::error::CdeError::Cancelled)?;
            for (index, result) in results {
                ordered[index] = Some(result?);
            }
        }

        Ok(ordered.into_iter().map(|j| j.expect("every index populated")).collect())
    }
}
