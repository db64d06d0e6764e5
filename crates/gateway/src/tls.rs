//! Certificate resolution for the loopback endpoint.
//!
//! Provisioning is external: configured PEM paths win. With no paths
//! configured, a self-signed loopback certificate is written into the config
//! directory so a development node starts without operator action.

use renderhive_types::config::RpcConfig;
use renderhive_types::error::{ConfigError, CoreError};
use std::path::{Path, PathBuf};

const DEV_CERT_FILE: &str = "rpc-cert.pem";
const DEV_KEY_FILE: &str = "rpc-key.pem";

pub(crate) fn resolve_certificate(
    rpc: &RpcConfig,
    config_dir: &Path,
) -> Result<(PathBuf, PathBuf), CoreError> {
    if let (Some(cert), Some(key)) = (&rpc.tls_cert_path, &rpc.tls_key_path) {
        for path in [cert, key] {
            if !path.exists() {
                return Err(ConfigError::MissingFile {
                    path: path.display().to_string(),
                }
                .into());
            }
        }
        return Ok((cert.clone(), key.clone()));
    }

    let cert_path = config_dir.join(DEV_CERT_FILE);
    let key_path = config_dir.join(DEV_KEY_FILE);
    if !(cert_path.exists() && key_path.exists()) {
        let certified = rcgen::generate_simple_self_signed(vec![
            "localhost".to_owned(),
            "127.0.0.1".to_owned(),
        ])
        .map_err(|e| ConfigError::Invalid(format!("self-signed certificate: {e}")))?;
        std::fs::create_dir_all(config_dir).map_err(ConfigError::from)?;
        std::fs::write(&cert_path, certified.cert.pem()).map_err(ConfigError::from)?;
        std::fs::write(&key_path, certified.key_pair.serialize_pem())
            .map_err(ConfigError::from)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))
                .map_err(ConfigError::from)?;
        }
        tracing::warn!(
            target: "gateway",
            cert = %cert_path.display(),
            "no TLS material configured; wrote a self-signed loopback certificate"
        );
    }
    Ok((cert_path, key_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_fallback_writes_a_certificate_once() {
        let dir = tempfile::tempdir().unwrap();
        let rpc = RpcConfig::default();
        let (cert, key) = resolve_certificate(&rpc, dir.path()).unwrap();
        assert!(cert.exists() && key.exists());
        let first = std::fs::read(&cert).unwrap();
        // A second resolution reuses the material instead of rotating it.
        resolve_certificate(&rpc, dir.path()).unwrap();
        assert_eq!(std::fs::read(&cert).unwrap(), first);
    }

    #[test]
    fn configured_paths_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let mut rpc = RpcConfig::default();
        rpc.tls_cert_path = Some(dir.path().join("missing-cert.pem"));
        rpc.tls_key_path = Some(dir.path().join("missing-key.pem"));
        assert!(resolve_certificate(&rpc, dir.path()).is_err());
    }
}
