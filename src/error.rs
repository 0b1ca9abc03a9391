// Copyright 2024 Saorsa Labs
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Structured error kinds for the Content Durability Engine (§7 of the design).

use crate::types::{ChunkIndex, ContentId, ShardIndex};
use thiserror::Error;

/// Errors surfaced by the codec (§4.1). Local to a single `encode`/`reconstruct` call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FecError {
    #[error("invalid shape: k={k}, m={m}, data length {data_len} is not a multiple of k")]
    InvalidShape { k: usize, m: usize, data_len: usize },

    #[error("too few shards for reconstruction: have {have}, need {need}")]
    TooFewShards { have: usize, need: usize },

    #[error("shard index {index} out of range for n={n}")]
    InvalidIndex { index: usize, n: usize },

    #[error("encoding matrix is not invertible for the requested survivor set")]
    SingularMatrix,
}

/// Top-level engine error kinds (§7).
#[derive(Debug, Error)]
pub enum CdeError {
    #[error("validation rejected: {reason}")]
    ValidationRejected { reason: String },

    #[error("no feasible placement for content {content_id} chunk {chunk_index}")]
    PlacementInfeasible {
        content_id: ContentId,
        chunk_index: ChunkIndex,
    },

    #[error("transient sink error on node {node_id}: {message}")]
    TransientSinkError { node_id: String, message: String },

    #[error("permanent sink error on node {node_id}: {message}")]
    PermanentSinkError { node_id: String, message: String },

    #[error("integrity failure for content {content_id} chunk {chunk_index} shard {shard_index}")]
    IntegrityFailure {
        content_id: ContentId,
        chunk_index: ChunkIndex,
        shard_index: ShardIndex,
    },

    #[error(
        "insufficient shards for content {content_id} chunk {chunk_index}: have {have}, need {need}"
    )]
    InsufficientShards {
        content_id: ContentId,
        chunk_index: ChunkIndex,
        have: usize,
        need: usize,
    },

    #[error("crypto failure for content {content_id}: {message}")]
    CryptoFailure { content_id: ContentId, message: String },

    #[error("decrypt failure for content {content_id}: key mismatch")]
    DecryptFailure { content_id: ContentId },

    #[error("index conflict for content {content_id}")]
    IndexConflict { content_id: ContentId },

    #[error("operation cancelled")]
    Cancelled,

    #[error("codec error: {0}")]
    Codec(#[from] FecError),

    #[error("content {0} not found")]
    NotFound(ContentId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CdeError>;
