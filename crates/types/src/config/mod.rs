//! Shared configuration structures for the node coordinator.
//!
//! Everything is loaded from a single `renderhive.toml`; every section has
//! serde defaults so a minimal file (network section only) starts a node.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration of one coordinator process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSettings,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
}

/// Identity-adjacent settings of this machine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeSettings {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub client_role: bool,
    #[serde(default)]
    pub render_role: bool,
}

/// Directory roots. Relative paths are resolved against the working
/// directory of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            data_dir: default_data_dir(),
        }
    }
}

/// The local TLS JSON-RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_bind")]
    pub bind_address: String,
    #[serde(default = "default_rpc_port")]
    pub port: u16,
    #[serde(default = "default_rpc_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_body_limit_kib")]
    pub body_limit_kib: u64,
    /// PEM certificate path; provisioning is external. When both this and
    /// `tls_key_path` are unset, a self-signed loopback certificate is
    /// written into the config directory.
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_address: default_rpc_bind(),
            port: default_rpc_port(),
            request_timeout_secs: default_rpc_timeout_secs(),
            body_limit_kib: default_body_limit_kib(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

/// Consensus service, mirror and contract endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Base URL of the mirror REST API.
    pub mirror_base_url: String,
    /// Base URL of the transaction submission bridge.
    pub submit_base_url: String,
    /// Address of the deployed coordination contract.
    pub contract: String,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_network_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum transaction fee, in the ledger's smallest denomination.
    #[serde(default = "default_max_fee")]
    pub max_transaction_fee: u64,
    pub topics: TopicsConfig,
}

/// The well-known topics, one set per environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    pub hive_cycle_synchronization: String,
    #[serde(default)]
    pub hive_cycle_application: String,
    #[serde(default)]
    pub hive_cycle_validation: String,
    pub render_job_queue: String,
    /// Account allowed to publish synchronization-topic reconfigurations.
    pub synchronization_admin: String,
}

/// The content-addressed storage daemon and the pinning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_api")]
    pub api_base_url: String,
    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,
    #[serde(default = "default_swarm_port")]
    pub swarm_port: u16,
    #[serde(default = "default_min_peers")]
    pub min_peers: usize,
    #[serde(default = "default_peer_wait_secs")]
    pub peer_wait_secs: u64,
    #[serde(default = "default_ip_echo_url")]
    pub ip_echo_url: String,
    #[serde(default = "default_pinning_cli")]
    pub pinning_cli: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_storage_api(),
            repo_dir: default_repo_dir(),
            swarm_port: default_swarm_port(),
            min_peers: default_min_peers(),
            peer_wait_secs: default_peer_wait_secs(),
            ip_echo_url: default_ip_echo_url(),
            pinning_cli: default_pinning_cli(),
        }
    }
}

/// Renderer subprocess policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// How many trailing stderr lines are attached to a failure.
    #[serde(default = "default_stderr_tail")]
    pub stderr_tail_lines: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            stderr_tail_lines: default_stderr_tail(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_config_dir() -> PathBuf {
    PathBuf::from("config")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_rpc_bind() -> String {
    "127.0.0.1".to_owned()
}
fn default_rpc_port() -> u16 {
    5174
}
fn default_rpc_timeout_secs() -> u64 {
    30
}
fn default_body_limit_kib() -> u64 {
    16 * 1024
}
fn default_gas_limit() -> u64 {
    300_000
}
fn default_network_timeout_secs() -> u64 {
    20
}
fn default_max_fee() -> u64 {
    200_000_000
}
fn default_storage_api() -> String {
    "http://127.0.0.1:5001".to_owned()
}
fn default_repo_dir() -> PathBuf {
    PathBuf::from("ipfs/repo")
}
fn default_swarm_port() -> u16 {
    4001
}
fn default_min_peers() -> usize {
    4
}
fn default_peer_wait_secs() -> u64 {
    10
}
fn default_ip_echo_url() -> String {
    "https://api.ipify.org".to_owned()
}
fn default_pinning_cli() -> PathBuf {
    PathBuf::from("w3")
}
fn default_stderr_tail() -> usize {
    20
}

impl NodeConfig {
    /// Checks the values a broken file most often gets wrong; failures are
    /// fatal at startup with an actionable message.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.mirror_base_url.is_empty() {
            return Err(ConfigError::Invalid("network.mirror_base_url is empty".into()));
        }
        if self.network.submit_base_url.is_empty() {
            return Err(ConfigError::Invalid("network.submit_base_url is empty".into()));
        }
        if self.network.contract.is_empty() {
            return Err(ConfigError::Invalid("network.contract is empty".into()));
        }
        if self.network.topics.hive_cycle_synchronization.is_empty() {
            return Err(ConfigError::Invalid(
                "network.topics.hive_cycle_synchronization is empty".into(),
            ));
        }
        if self.network.topics.render_job_queue.is_empty() {
            return Err(ConfigError::Invalid(
                "network.topics.render_job_queue is empty".into(),
            ));
        }
        if self.network.topics.synchronization_admin.is_empty() {
            return Err(ConfigError::Invalid(
                "network.topics.synchronization_admin is empty".into(),
            ));
        }
        if self.rpc.port == 0 {
            return Err(ConfigError::Invalid("rpc.port must be non-zero".into()));
        }
        if self.rpc.tls_cert_path.is_some() != self.rpc.tls_key_path.is_some() {
            return Err(ConfigError::Invalid(
                "rpc.tls_cert_path and rpc.tls_key_path must be set together".into(),
            ));
        }
        if self.storage.min_peers == 0 {
            return Err(ConfigError::Invalid("storage.min_peers must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [network]
        mirror_base_url = "https://testnet.mirrornode.example.com"
        submit_base_url = "https://testnet.bridge.example.com"
        contract = "0.0.4200000"

        [network.topics]
        hive_cycle_synchronization = "0.0.4200001"
        render_job_queue = "0.0.4200004"
        synchronization_admin = "0.0.390000"
    "#;

    #[test]
    fn minimal_file_gets_defaults() {
        let config: NodeConfig = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.rpc.port, 5174);
        assert_eq!(config.rpc.bind_address, "127.0.0.1");
        assert_eq!(config.storage.min_peers, 4);
        assert_eq!(config.renderer.stderr_tail_lines, 20);
        assert!(config.node.client_role);
        assert!(!config.node.render_role);
    }

    #[test]
    fn tls_paths_must_pair() {
        let mut config: NodeConfig = toml::from_str(MINIMAL).unwrap();
        config.rpc.tls_cert_path = Some(PathBuf::from("cert.pem"));
        assert!(config.validate().is_err());
        config.rpc.tls_key_path = Some(PathBuf::from("key.pem"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_topic_is_rejected() {
        let mut config: NodeConfig = toml::from_str(MINIMAL).unwrap();
        config.network.topics.render_job_queue.clear();
        assert!(config.validate().is_err());
    }
}
