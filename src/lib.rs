// Copyright 2024 Saorsa Labs
// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Content Durability Engine
//!
//! A pipelined, erasure-coded, geographically-distributed storage
//! subsystem. Content is split into chunks, each chunk is Reed-Solomon
//! encoded into `k + m` shards over GF(2⁸), and shards are scattered across
//! independent storage nodes so that any `k` survivors reconstruct the
//! original bytes. A health scan samples placements continuously and
//! repairs chunks that fall below their policy's redundancy headroom.
//!
//! The [`engine::Engine`] type is the library's main entry point: `store`,
//! `retrieve`, `delete`, `health`, and `repair`.

pub mod chunker;
pub mod codec;
pub mod collaborators;
pub mod config;
pub mod crypto;
pub mod distributor;
pub mod engine;
pub mod error;
pub mod gc;
pub mod gf256;
pub mod health;
pub mod index;
pub mod metrics;
pub mod pipeline;
pub mod retriever;
pub mod types;

pub use codec::Codec;
pub use config::Config;
pub use engine::Engine;
pub use error::{CdeError, FecError, Result};
pub use types::{ChunkIndex, ContentId, Policy, ShardIndex};
