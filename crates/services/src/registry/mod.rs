//! The on-disk operator/node registry.
//!
//! Write-then-reload discipline: every mutation marshals, writes with
//! restrictive permissions, then re-reads the file, so the in-memory state
//! is always exactly the file's decoded form. The SHA-256 digest of
//! `node.json` is the node fingerprint used as the sign-in challenge.

use renderhive_types::app::{NodeRecord, Operator};
use renderhive_types::error::ConfigError;
use renderhive_types::paths;
use std::path::{Path, PathBuf};

/// Ledger credentials of the operator, from the dotenv-style env file.
#[derive(Debug, Clone)]
pub struct OperatorCredentials {
    pub account_id: String,
    pub private_key: String,
}

/// The registry of the two records under the config directory.
pub struct NodeRegistry {
    config_dir: PathBuf,
    operator: Option<Operator>,
    node: Option<NodeRecord>,
}

impl NodeRegistry {
    /// Opens the registry, loading whatever records already exist. A missing
    /// node record is normal before sign-up; a corrupt one is fatal.
    pub fn open(config_dir: &Path) -> Result<Self, ConfigError> {
        std::fs::create_dir_all(config_dir)?;
        let mut registry = Self {
            config_dir: config_dir.to_path_buf(),
            operator: None,
            node: None,
        };
        registry.operator = registry.read_record(paths::OPERATOR_FILE)?;
        registry.node = registry.read_record(paths::NODE_FILE)?;
        Ok(registry)
    }

    pub fn operator(&self) -> Option<&Operator> {
        self.operator.as_ref()
    }

    pub fn node(&self) -> Option<&NodeRecord> {
        self.node.as_ref()
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn save_operator(&mut self, operator: Operator) -> Result<(), ConfigError> {
        self.operator = Some(self.write_then_reload(paths::OPERATOR_FILE, &operator)?);
        Ok(())
    }

    pub fn save_node(&mut self, node: NodeRecord) -> Result<(), ConfigError> {
        self.node = Some(self.write_then_reload(paths::NODE_FILE, &node)?);
        Ok(())
    }

    /// The sign-in challenge: SHA-256 of the node record file bytes.
    pub fn node_fingerprint(&self) -> Result<[u8; 32], ConfigError> {
        let path = self.config_dir.join(paths::NODE_FILE);
        let bytes = std::fs::read(&path).map_err(|_| ConfigError::MissingFile {
            path: path.display().to_string(),
        })?;
        Ok(renderhive_crypto::sha256(&bytes))
    }

    /// Parses the `TESTNET_ACCOUNT_ID` / `TESTNET_PRIVATE_KEY` pair from the
    /// operator env file.
    pub fn operator_credentials(&self) -> Result<OperatorCredentials, ConfigError> {
        let path = self.config_dir.join(paths::OPERATOR_ENV_FILE);
        let content = std::fs::read_to_string(&path).map_err(|_| ConfigError::MissingFile {
            path: path.display().to_string(),
        })?;
        let mut account_id = None;
        let mut private_key = None;
        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Corrupt {
                    path: path.display().to_string(),
                    reason: format!("not a KEY=VALUE line: `{line}`"),
                });
            };
            let value = value.trim().trim_matches('"').to_owned();
            match key.trim() {
                paths::ENV_ACCOUNT_ID => account_id = Some(value),
                paths::ENV_PRIVATE_KEY => private_key = Some(value),
                _ => {}
            }
        }
        match (account_id, private_key) {
            (Some(account_id), Some(private_key)) => Ok(OperatorCredentials {
                account_id,
                private_key,
            }),
            _ => Err(ConfigError::Corrupt {
                path: path.display().to_string(),
                reason: format!(
                    "missing {} or {}",
                    paths::ENV_ACCOUNT_ID,
                    paths::ENV_PRIVATE_KEY
                ),
            }),
        }
    }

    fn read_record<T: serde::de::DeserializeOwned>(
        &self,
        file: &str,
    ) -> Result<Option<T>, ConfigError> {
        let path = self.config_dir.join(file);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ConfigError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    fn write_then_reload<T>(&self, file: &str, record: &T) -> Result<T, ConfigError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let path = self.config_dir.join(file);
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| ConfigError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(&path, &bytes)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        let reread = std::fs::read(&path)?;
        serde_json::from_slice(&reread).map_err(|e| ConfigError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderhive_types::app::{AccountAddress, NodeRoles};

    fn operator() -> Operator {
        Operator {
            user_id: 1,
            username: "alice".into(),
            email: "alice@example.org".into(),
            address: AccountAddress::parse("0.0.390079").unwrap(),
            public_key: "302a300506".into(),
        }
    }

    fn node() -> NodeRecord {
        NodeRecord {
            node_id: -1,
            name: "alice-mac".into(),
            address: AccountAddress::parse("0.0.4117950").unwrap(),
            public_key: "ed25519pub".into(),
            roles: NodeRoles {
                client: true,
                render: true,
            },
        }
    }

    #[test]
    fn write_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = NodeRegistry::open(dir.path()).unwrap();
        registry.save_operator(operator()).unwrap();
        registry.save_node(node()).unwrap();

        // A fresh open sees exactly what was persisted.
        let reopened = NodeRegistry::open(dir.path()).unwrap();
        assert_eq!(reopened.operator().unwrap(), &operator());
        assert_eq!(reopened.node().unwrap(), &node());
    }

    #[test]
    fn fingerprint_is_hash_of_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = NodeRegistry::open(dir.path()).unwrap();
        assert!(registry.node_fingerprint().is_err());

        registry.save_node(node()).unwrap();
        let bytes = std::fs::read(dir.path().join(paths::NODE_FILE)).unwrap();
        assert_eq!(
            registry.node_fingerprint().unwrap(),
            renderhive_crypto::sha256(&bytes)
        );
    }

    #[test]
    fn corrupt_record_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(paths::NODE_FILE), b"{not json").unwrap();
        assert!(matches!(
            NodeRegistry::open(dir.path()),
            Err(ConfigError::Corrupt { .. })
        ));
    }

    #[test]
    fn operator_env_parsing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(paths::OPERATOR_ENV_FILE),
            "# testnet credentials\nTESTNET_ACCOUNT_ID=0.0.390079\nTESTNET_PRIVATE_KEY=\"302e0201\"\n",
        )
        .unwrap();
        let registry = NodeRegistry::open(dir.path()).unwrap();
        let creds = registry.operator_credentials().unwrap();
        assert_eq!(creds.account_id, "0.0.390079");
        assert_eq!(creds.private_key, "302e0201");

        std::fs::write(dir.path().join(paths::OPERATOR_ENV_FILE), "garbage line\n").unwrap();
        assert!(registry.operator_credentials().is_err());
    }
}
