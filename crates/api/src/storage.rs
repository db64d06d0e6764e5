//! Seams to the content-addressed storage daemon and the pinning service.

use async_trait::async_trait;
use renderhive_types::app::Cid;
use renderhive_types::error::NetworkError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A peer the storage daemon is connected to.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub peer_id: String,
    pub address: String,
}

/// The local content-addressed file-system daemon.
///
/// This adapter is the only writer to the local repository.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Adds a file to the repository, optionally pinning it.
    async fn add(&self, path: &Path, pin: bool) -> Result<Cid, NetworkError>;
    /// Computes the CID without writing anything to the repository.
    async fn hash_only(&self, path: &Path) -> Result<Cid, NetworkError>;
    /// Fetches `cid` into `out_path` and returns the written path.
    async fn get(&self, cid: &Cid, out_path: &Path) -> Result<PathBuf, NetworkError>;
    async fn pin(&self, cid: &Cid) -> Result<bool, NetworkError>;
    async fn unpin(&self, cid: &Cid) -> Result<bool, NetworkError>;
    async fn swarm_connect(&self, multiaddr: &str) -> Result<(), NetworkError>;
    async fn swarm_disconnect(&self, multiaddr: &str) -> Result<(), NetworkError>;
    async fn connected_peers(&self) -> Result<Vec<PeerInfo>, NetworkError>;
    /// Releases resources on shutdown.
    async fn close(&self) -> Result<(), NetworkError>;
}

/// A decentralized identifier reported by the pinning agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(pub String);

/// One space the pinning agent can upload into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceInfo {
    pub did: Did,
    pub name: String,
    /// Whether this space is the agent's currently selected one.
    pub current: bool,
}

/// The single-line JSON record the CLI prints per upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub root: Cid,
    #[serde(default)]
    pub shards: Vec<String>,
}

/// The durability service, driven through its CLI.
#[async_trait]
pub trait PinningProvider: Send + Sync {
    async fn whoami(&self) -> Result<Did, NetworkError>;
    async fn space_list(&self) -> Result<Vec<SpaceInfo>, NetworkError>;
    async fn space_create(&self, name: &str) -> Result<Did, NetworkError>;
    async fn space_add(&self, proof: &str) -> Result<Did, NetworkError>;
    async fn space_use(&self, did: &Did) -> Result<(), NetworkError>;
    /// Lists uploads in the current space. Requires at least one space to
    /// exist; callers check `space_list` first.
    async fn upload_list(&self) -> Result<Vec<UploadRecord>, NetworkError>;
    async fn upload(&self, paths: &[PathBuf]) -> Result<UploadRecord, NetworkError>;
    async fn remove(&self, cid: &Cid) -> Result<(), NetworkError>;
    async fn delegation_create(&self, audience: &Did) -> Result<String, NetworkError>;
    async fn delegation_list(&self) -> Result<Vec<String>, NetworkError>;
    async fn proof_add(&self, proof_path: &Path) -> Result<(), NetworkError>;
    async fn proof_list(&self) -> Result<Vec<String>, NetworkError>;
}
