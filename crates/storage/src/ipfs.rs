//! The content-addressed daemon adapter.
//!
//! This adapter is the only writer to the local repository. Startup attaches
//! to the daemon, injects announce addresses for the discovered public IP,
//! and blocks until the swarm has enough peers to be useful.

use crate::ip;
use async_trait::async_trait;
use renderhive_api::storage::{ObjectStore, PeerInfo};
use renderhive_types::app::Cid;
use renderhive_types::config::StorageConfig;
use renderhive_types::error::NetworkError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const PEER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// HTTP client to the local daemon API.
pub struct IpfsStore {
    http: reqwest::Client,
    base: String,
}

#[derive(Deserialize)]
struct AddResponseDto {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Deserialize)]
struct PinResponseDto {
    #[serde(rename = "Pins", default)]
    pins: Vec<String>,
}

#[derive(Deserialize)]
struct PeerDto {
    #[serde(rename = "Peer")]
    peer: String,
    #[serde(rename = "Addr")]
    addr: String,
}

#[derive(Deserialize)]
struct PeersResponseDto {
    #[serde(rename = "Peers", default)]
    peers: Option<Vec<PeerDto>>,
}

#[derive(Deserialize)]
struct IdResponseDto {
    #[serde(rename = "ID")]
    id: String,
}

impl IpfsStore {
    /// Attaches to the daemon, announces the public address, and waits for
    /// the swarm. Zero peers after the wait budget is a hard failure.
    pub async fn start(config: &StorageConfig) -> Result<Self, NetworkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NetworkError::Daemon(e.to_string()))?;
        let store = Self {
            http,
            base: config.api_base_url.trim_end_matches('/').to_owned(),
        };

        // Open or create the local repository directory; the daemon owns its
        // contents, the coordinator only guarantees the path exists.
        std::fs::create_dir_all(&config.repo_dir)
            .map_err(|e| NetworkError::Daemon(format!("repository directory: {e}")))?;

        let id: IdResponseDto = store.call("id", &[]).await?;
        tracing::info!(target: "storage", peer_id = %id.id, "attached to storage daemon");

        // Best-effort public reachability: announce the echoed address over
        // TCP and QUIC. A failed echo only costs announced addresses.
        match ip::discover_public_ip(&store.http, &config.ip_echo_url).await {
            Ok(addr) => {
                let announce = ip::announce_multiaddrs(addr, config.swarm_port);
                store.set_announce_addresses(&announce).await?;
                tracing::info!(target: "storage", ?announce, "announcing public addresses");
            }
            Err(e) => {
                tracing::warn!(target: "storage", error = %e, "public ip discovery failed");
            }
        }

        store
            .wait_for_peers(config.min_peers, Duration::from_secs(config.peer_wait_secs))
            .await?;
        Ok(store)
    }

    async fn wait_for_peers(&self, min_peers: usize, budget: Duration) -> Result<(), NetworkError> {
        let deadline = Instant::now() + budget;
        loop {
            let count = self.connected_peers().await.map(|p| p.len()).unwrap_or(0);
            if count >= min_peers {
                tracing::info!(target: "storage", peers = count, "swarm ready");
                return Ok(());
            }
            if Instant::now() >= deadline {
                if count == 0 {
                    return Err(NetworkError::Daemon(
                        "no swarm peers after startup wait".into(),
                    ));
                }
                tracing::warn!(
                    target: "storage",
                    peers = count,
                    wanted = min_peers,
                    "continuing with a thin swarm"
                );
                return Ok(());
            }
            tokio::time::sleep(PEER_POLL_INTERVAL).await;
        }
    }

    async fn set_announce_addresses(&self, addrs: &[String]) -> Result<(), NetworkError> {
        let value = serde_json::to_string(addrs).map_err(|e| NetworkError::Daemon(e.to_string()))?;
        let url = format!("{}/api/v0/config", self.base);
        let response = self
            .http
            .post(&url)
            .query(&[
                ("arg", "Addresses.Announce"),
                ("arg", value.as_str()),
                ("json", "true"),
            ])
            .send()
            .await
            .map_err(|e| NetworkError::Daemon(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NetworkError::Daemon(format!(
                "config set returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        command: &str,
        args: &[(&str, &str)],
    ) -> Result<T, NetworkError> {
        let response = self.call_raw(command, args).await?;
        response
            .json()
            .await
            .map_err(|e| NetworkError::Daemon(format!("{command}: {e}")))
    }

    async fn call_raw(
        &self,
        command: &str,
        args: &[(&str, &str)],
    ) -> Result<reqwest::Response, NetworkError> {
        let url = format!("{}/api/v0/{}", self.base, command);
        let response = self
            .http
            .post(&url)
            .query(args)
            .send()
            .await
            .map_err(|e| NetworkError::Daemon(format!("{command}: {e}")))?;
        if !response.status().is_success() {
            return Err(NetworkError::Daemon(format!(
                "{command} returned {}",
                response.status()
            )));
        }
        Ok(response)
    }

    async fn add_path(&self, path: &Path, pin: bool, only_hash: bool) -> Result<Cid, NetworkError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| NetworkError::Daemon(format!("read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_owned());
        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(data).file_name(file_name));

        let url = format!(
            "{}/api/v0/add?pin={}&only-hash={}&cid-version=1",
            self.base, pin, only_hash
        );
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| NetworkError::Daemon(format!("add: {e}")))?;
        if !response.status().is_success() {
            return Err(NetworkError::Daemon(format!(
                "add returned {}",
                response.status()
            )));
        }
        let dto: AddResponseDto = response
            .json()
            .await
            .map_err(|e| NetworkError::Daemon(format!("add: {e}")))?;
        Ok(Cid(dto.hash))
    }
}

#[async_trait]
impl ObjectStore for IpfsStore {
    async fn add(&self, path: &Path, pin: bool) -> Result<Cid, NetworkError> {
        self.add_path(path, pin, false).await
    }

    async fn hash_only(&self, path: &Path) -> Result<Cid, NetworkError> {
        self.add_path(path, false, true).await
    }

    async fn get(&self, cid: &Cid, out_path: &Path) -> Result<PathBuf, NetworkError> {
        let response = self.call_raw("cat", &[("arg", cid.as_str())]).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| NetworkError::Daemon(format!("cat {cid}: {e}")))?;
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| NetworkError::Daemon(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(out_path, &bytes)
            .await
            .map_err(|e| NetworkError::Daemon(format!("write {}: {e}", out_path.display())))?;
        Ok(out_path.to_path_buf())
    }

    async fn pin(&self, cid: &Cid) -> Result<bool, NetworkError> {
        let dto: PinResponseDto = self.call("pin/add", &[("arg", cid.as_str())]).await?;
        Ok(dto.pins.iter().any(|p| p == cid.as_str()))
    }

    async fn unpin(&self, cid: &Cid) -> Result<bool, NetworkError> {
        let dto: PinResponseDto = self.call("pin/rm", &[("arg", cid.as_str())]).await?;
        Ok(dto.pins.iter().any(|p| p == cid.as_str()))
    }

    async fn swarm_connect(&self, multiaddr: &str) -> Result<(), NetworkError> {
        self.call_raw("swarm/connect", &[("arg", multiaddr)]).await?;
        Ok(())
    }

    async fn swarm_disconnect(&self, multiaddr: &str) -> Result<(), NetworkError> {
        self.call_raw("swarm/disconnect", &[("arg", multiaddr)]).await?;
        Ok(())
    }

    async fn connected_peers(&self) -> Result<Vec<PeerInfo>, NetworkError> {
        let dto: PeersResponseDto = self.call("swarm/peers", &[]).await?;
        Ok(dto
            .peers
            .unwrap_or_default()
            .into_iter()
            .map(|p| PeerInfo {
                peer_id: p.peer,
                address: p.addr,
            })
            .collect())
    }

    async fn close(&self) -> Result<(), NetworkError> {
        // The daemon drops the connection while shutting down; that is the
        // expected outcome, not an error.
        if let Err(e) = self.call_raw("shutdown", &[]).await {
            tracing::debug!(target: "storage", error = %e, "daemon closed the shutdown call");
        }
        Ok(())
    }
}
