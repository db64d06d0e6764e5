//! Well-known file names and directory layout under the node's roots.
//!
//! These constants are the single source of truth for where records live;
//! the keystore in particular is only ever located through
//! [`keystore_file_name`].

use crate::app::AccountAddress;
use std::path::{Path, PathBuf};

/// The persisted operator record, under the config directory.
pub const OPERATOR_FILE: &str = "operator.json";
/// The persisted node record, under the config directory.
pub const NODE_FILE: &str = "node.json";
/// Dotenv-style operator ledger credentials, under the config directory.
pub const OPERATOR_ENV_FILE: &str = "operator.env";

/// Variable names inside [`OPERATOR_ENV_FILE`].
pub const ENV_ACCOUNT_ID: &str = "TESTNET_ACCOUNT_ID";
pub const ENV_PRIVATE_KEY: &str = "TESTNET_PRIVATE_KEY";

/// The session cookie presented on every authenticated local RPC.
pub const SESSION_COOKIE_NAME: &str = "renderhive-session";

/// Own submissions, under the data directory.
pub const RENDER_REQUESTS_LOCAL_DIR: &str = "render_requests/local";
/// Everything seen on the queue topic, under the data directory.
pub const RENDER_REQUESTS_NETWORK_DIR: &str = "render_requests/network";
/// Benchmark samples, under the data directory.
pub const BENCHMARKS_DIR: &str = "blender_benchmarks";

/// The keystore file name for an account: dots stripped, `.key` appended.
/// This is the only way a keystore is located.
pub fn keystore_file_name(address: &AccountAddress) -> String {
    format!("{}.key", address.strip_dots())
}

/// Absolute keystore path under a config directory.
pub fn keystore_path(config_dir: &Path, address: &AccountAddress) -> PathBuf {
    config_dir.join(keystore_file_name(address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keystore_name_strips_dots() {
        let addr = AccountAddress::parse("0.0.390079").unwrap();
        assert_eq!(keystore_file_name(&addr), "00390079.key");
    }
}
