//! Ambient counters for the ingest and retrieval paths, exposed as plain
//! atomics and mirrored into `tracing` events rather than a dedicated
//! metrics crate — the teacher's dependency table carries no metrics
//! exporter, so this stays in the same idiom as its `tracing`-based logging.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct Metrics {
    pub chunks_ingested: AtomicU64,
    pub chunks_retrieved: AtomicU64,
    pub shards_reconstructed: AtomicU64,
    pub repairs_performed: AtomicU64,
    pub integrity_failures: AtomicU64,
}

impl Metrics {
    pub fn record_ingest(&self) {
        self.chunks_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retrieve(&self) {
        self.chunks_retrieved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconstruction(&self) {
        self.shards_reconstructed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_repair(&self) {
        self.repairs_performed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_integrity_failure(&self) {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunks_ingested: self.chunks_ingested.load(Ordering::Relaxed),
            chunks_retrieved: self.chunks_retrieved.load(Ordering::Relaxed),
            shards_reconstructed: self.shards_reconstructed.load(Ordering::Relaxed),
            repairs_performed: self.repairs_performed.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_snapshot(&self) {
        let s = self.snapshot();
        info!(
            chunks_ingested = s.chunks_ingested,
            chunks_retrieved = s.chunks_retrieved,
            shards_reconstructed = s.shards_reconstructed,
            repairs_performed = s.repairs_performed,
            integrity_failures = s.integrity_failures,
            "metrics snapshot"
        );
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub chunks_ingested: u64,
    pub chunks_retrieved: u64,
    pub shards_reconstructed: u64,
    pub repairs_performed: u64,
    pub integrity_failures: u64,
}
