//! External collaborator traits (§6): `ObjectSink`, `NodeDirectory`,
//! `IdentityProvider`, `Clock`, plus in-memory reference implementations
//! used by tests and the engine's own doctests.

use crate::error::{CdeError, Result};
use crate::types::NodeInfo;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Content-addressed blob store a shard is written to and read from. A
/// single `ObjectSink` instance represents one storage node.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    async fn put(&self, key: &[u8], data: &[u8]) -> Result<()>;
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>>;
    async fn has(&self, key: &[u8]) -> Result<bool>;
    async fn delete(&self, key: &[u8]) -> Result<()>;
    /// Enumerate every key held, used by the garbage collector's mark phase.
    /// Sinks that can't enumerate cheaply may return an empty list.
    async fn list(&self) -> Result<Vec<Vec<u8>>>;
}

/// Directory of candidate/holder nodes, queried by the distributor and
/// health scanner for placement and liveness decisions.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    async fn candidates(&self, region_hint: Option<&str>) -> Result<Vec<NodeInfo>>;
    async fn node(&self, node_id: &str) -> Result<Option<NodeInfo>>;
    async fn sink_for(&self, node_id: &str) -> Result<Arc<dyn ObjectSink>>;
}

/// Identity/authorization boundary — out of scope for this engine's own
/// logic, but every write path takes one so a real deployment can plug auth
/// in without touching the pipeline.
pub trait IdentityProvider: Send + Sync {
    fn authorize_write(&self, principal: &str) -> bool;
    fn authorize_read(&self, principal: &str) -> bool;
}

/// Wall-clock abstraction so health/index timestamps are deterministic in tests.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Always-allow identity provider for local testing and single-tenant setups.
#[derive(Debug, Default)]
pub struct OpenIdentityProvider;

impl IdentityProvider for OpenIdentityProvider {
    fn authorize_write(&self, _principal: &str) -> bool {
        true
    }

    fn authorize_read(&self, _principal: &str) -> bool {
        true
    }
}

/// In-memory `ObjectSink`, used by unit tests and the in-process `NodeDirectory`.
#[derive(Debug, Default)]
pub struct MemorySink {
    data: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

#[async_trait]
impl ObjectSink for MemorySink {
    async fn put(&self, key: &[u8], data: &[u8]) -> Result<()> {
        self.data.write().insert(key.to_vec(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.data
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| CdeError::PermanentSinkError {
                node_id: "memory".to_string(),
                message: format!("no such key: {}", hex::encode(key)),
            })
    }

    async fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.data.read().contains_key(key))
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.data.read().keys().cloned().collect())
    }
}

/// Local filesystem `ObjectSink`, sharded two directory levels deep exactly
/// as the teacher's `LocalStorage` lays out chunk files, with the same
/// write-to-temp-then-rename durability pattern.
pub struct LocalFileSink {
    base_path: PathBuf,
}

impl LocalFileSink {
    pub async fn new(base_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn path_for(&self, key: &[u8]) -> PathBuf {
        let hex = hex::encode(key);
        let mut path = self.base_path.clone();
        for level in 0..2 {
            if hex.len() > level * 2 + 2 {
                path = path.join(&hex[level * 2..level * 2 + 2]);
            }
        }
        path.join(format!("{hex}.shard"))
    }
}

#[async_trait]
impl ObjectSink for LocalFileSink {
    async fn put(&self, key: &[u8], data: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        fs::rename(temp_path, path).await?;
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        let mut file = fs::File::open(&path).await?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;
        Ok(data)
    }

    async fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(fs::metadata(self.path_for(key)).await.is_ok())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.base_path.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(_) => continue,
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if let Some(hex) = name.strip_suffix(".shard") {
                        if let Ok(bytes) = hex::decode(hex) {
                            keys.push(bytes);
                        }
                    }
                }
            }
        }
        Ok(keys)
    }
}

/// A reference `NodeDirectory` over a fixed, in-process node set — each node
/// backed by its own `MemorySink`. Good enough for tests and single-process
/// demos; a real deployment replaces this with a network-backed directory.
#[derive(Default)]
pub struct InMemoryDirectory {
    nodes: RwLock<HashMap<String, (NodeInfo, Arc<dyn ObjectSink>)>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, info: NodeInfo) {
        let node_id = info.node_id.clone();
        self.nodes
            .write()
            .insert(node_id, (info, Arc::new(MemorySink::default())));
    }

    pub fn set_reliability(&self, node_id: &str, reliability: f64) {
        if let Some((info, _)) = self.nodes.write().get_mut(node_id) {
            info.reliability = reliability;
        }
    }
}

#[async_trait]
impl NodeDirectory for InMemoryDirectory {
    async fn candidates(&self, region_hint: Option<&str>) -> Result<Vec<NodeInfo>> {
        let nodes = self.nodes.read();
        Ok(nodes
            .values()
            .filter(|(info, _)| region_hint.is_none_or(|r| info.region == r))
            .map(|(info, _)| info.clone())
            .collect())
    }

    async fn node(&self, node_id: &str) -> Result<Option<NodeInfo>> {
        Ok(self.nodes.read().get(node_id).map(|(info, _)| info.clone()))
    }

    async fn sink_for(&self, node_id: &str) -> Result<Arc<dyn ObjectSink>> {
        self.nodes
            .read()
            .get(node_id)
            .map(|(_, sink)| sink.clone())
            .ok_or_else(|| CdeError::PermanentSinkError {
                node_id: node_id.to_string(),
                message: "unknown node".to_string(),
            })
    }
}
