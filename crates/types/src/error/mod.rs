//! The error taxonomy of the node coordinator.
//!
//! One enum per failure domain; every enum implements [`ErrorCode`] so the
//! gateway and the log always carry a stable, machine-readable code next to
//! the human-readable message.

use crate::app::JobState;
use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Startup-fatal problems with the on-disk configuration and records.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required file is missing from the config directory.
    #[error("missing configuration file: {path}")]
    MissingFile { path: String },
    /// A file exists but cannot be decoded.
    #[error("corrupt configuration file {path}: {reason}")]
    Corrupt { path: String, reason: String },
    /// A configuration value fails validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// An I/O failure while reading or writing configuration state.
    #[error("configuration i/o error: {0}")]
    Io(String),
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::MissingFile { .. } => "CONFIG_MISSING_FILE",
            Self::Corrupt { .. } => "CONFIG_CORRUPT",
            Self::Invalid(_) => "CONFIG_INVALID",
            Self::Io(_) => "CONFIG_IO",
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Failures of the encrypted node keystore. Never retried.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// The passphrase does not decrypt the keystore.
    #[error("keystore decryption failed (wrong passphrase or corrupted file)")]
    WrongPassphrase,
    /// The keystore file is shorter than its declared layout.
    #[error("keystore file truncated")]
    Truncated,
    /// Header or payload bytes do not match the keystore format.
    #[error("malformed keystore: {0}")]
    Malformed(String),
    /// No keystore exists where the node record points.
    #[error("keystore not found: {path}")]
    NotFound { path: String },
    #[error("keystore i/o error: {0}")]
    Io(String),
}

impl ErrorCode for KeystoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::WrongPassphrase => "KEYSTORE_WRONG_PASSPHRASE",
            Self::Truncated => "KEYSTORE_TRUNCATED",
            Self::Malformed(_) => "KEYSTORE_MALFORMED",
            Self::NotFound { .. } => "KEYSTORE_NOT_FOUND",
            Self::Io(_) => "KEYSTORE_IO",
        }
    }
}

/// Failures reaching the consensus service, the mirror, the storage daemon
/// or the pinning service. Idempotent operations are retried with backoff.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request to {endpoint} failed: {reason}")]
    Http { endpoint: String, reason: String },
    /// The ledger rejected a transaction; `status` is its receipt status.
    #[error("transaction failed with receipt status {status}")]
    ReceiptStatus { status: String },
    /// All backoff attempts were spent.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    /// The content-addressed storage daemon misbehaved.
    #[error("storage daemon error: {0}")]
    Daemon(String),
    /// The pinning-service CLI failed or produced unparseable output.
    #[error("pinning service error: {0}")]
    Pinning(String),
    /// The expected record never appeared on the mirror.
    #[error("mirror lookup failed: {0}")]
    Mirror(String),
}

impl ErrorCode for NetworkError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http { .. } => "NETWORK_HTTP",
            Self::ReceiptStatus { .. } => "NETWORK_RECEIPT_STATUS",
            Self::RetriesExhausted { .. } => "NETWORK_RETRIES_EXHAUSTED",
            Self::Daemon(_) => "NETWORK_STORAGE_DAEMON",
            Self::Pinning(_) => "NETWORK_PINNING",
            Self::Mirror(_) => "NETWORK_MIRROR",
        }
    }
}

/// Envelope and JSON-RPC protocol violations. Dropped silently when inbound
/// from the log, surfaced as an RPC error when inbound from the local UI.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("incompatible envelope version {got}")]
    VersionMismatch { got: String },
    #[error("unknown method {method}")]
    UnknownMethod { method: String },
    /// A local-only method arrived over a consensus topic.
    #[error("method {method} is not accepted from the log")]
    NotRoutable { method: String },
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::VersionMismatch { .. } => "PROTOCOL_VERSION_MISMATCH",
            Self::UnknownMethod { .. } => "PROTOCOL_UNKNOWN_METHOD",
            Self::NotRoutable { .. } => "PROTOCOL_NOT_ROUTABLE",
            Self::Malformed(_) => "PROTOCOL_MALFORMED",
            Self::InvalidParams(_) => "PROTOCOL_INVALID_PARAMS",
        }
    }
}

/// An operation the local state machine rejects. Returned synchronously.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid job transition {from:?} -> {to:?}")]
    InvalidTransition { from: JobState, to: JobState },
    #[error("unknown entry: {0}")]
    NotFound(String),
    /// Mutation attempted on a published (CID-addressed) record.
    #[error("record is published and immutable: {0}")]
    AlreadyPublished(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// A signed outbound action was attempted without an active session.
    #[error("no active session")]
    SessionInactive,
    /// The sign-up procedure was invoked out of order.
    #[error("sign-up step {step} requires {requires} to have completed")]
    SignUpOrder { step: String, requires: String },
    #[error("duplicate entry: {0}")]
    Duplicate(String),
}

impl ErrorCode for StateError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "STATE_INVALID_TRANSITION",
            Self::NotFound(_) => "STATE_NOT_FOUND",
            Self::AlreadyPublished(_) => "STATE_ALREADY_PUBLISHED",
            Self::InvalidValue(_) => "STATE_INVALID_VALUE",
            Self::SessionInactive => "STATE_SESSION_INACTIVE",
            Self::SignUpOrder { .. } => "STATE_SIGNUP_ORDER",
            Self::Duplicate(_) => "STATE_DUPLICATE",
        }
    }
}

/// Violations of cross-node agreement. Logged at error level, the session is
/// invalidated, and there is no automatic recovery.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    /// A later hive-cycle iteration claimed an earlier start time.
    #[error(
        "hive cycle configurations inconsistent: iteration {iteration} at {start} \
         contradicts iteration {seen_iteration} at {seen_start}"
    )]
    HiveCycleInconsistent {
        iteration: u64,
        start: String,
        seen_iteration: u64,
        seen_start: String,
    },
    /// The same node claimed the same job twice in one cycle.
    #[error("double claim of job {cid} by {address}")]
    DoubleClaim { cid: String, address: String },
    /// A node account appeared twice in the registry.
    #[error("duplicate node registration for {address}")]
    DuplicateRegistration { address: String },
}

impl ErrorCode for ConsistencyError {
    fn code(&self) -> &'static str {
        match self {
            Self::HiveCycleInconsistent { .. } => "CONSISTENCY_HIVE_CYCLE",
            Self::DoubleClaim { .. } => "CONSISTENCY_DOUBLE_CLAIM",
            Self::DuplicateRegistration { .. } => "CONSISTENCY_DUPLICATE_REGISTRATION",
        }
    }
}

/// Renderer subprocess failures. Never retried automatically.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("renderer could not be spawned: {0}")]
    Spawn(String),
    /// Non-zero exit; `stderr_tail` holds the captured last lines.
    #[error("renderer exited with code {code}")]
    NonZeroExit { code: i32, stderr_tail: Vec<String> },
    /// Exit code zero but the expected output files are absent.
    #[error("renderer produced no output at {path}")]
    MissingOutput { path: String },
}

impl ErrorCode for RendererError {
    fn code(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "RENDERER_SPAWN",
            Self::NonZeroExit { .. } => "RENDERER_NON_ZERO_EXIT",
            Self::MissingOutput { .. } => "RENDERER_MISSING_OUTPUT",
        }
    }
}

/// The umbrella error handlers return; the gateway maps each taxon to a
/// stable JSON-RPC error code.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Keystore(#[from] KeystoreError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    #[error(transparent)]
    Renderer(#[from] RendererError),
    /// Missing or invalid session cookie on an authenticated method.
    #[error("authentication required")]
    Unauthorized,
}

impl CoreError {
    /// The JSON-RPC error code for this taxon; stable across releases.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Config(_) => -32001,
            Self::Keystore(_) => -32002,
            Self::Network(_) => -32003,
            Self::Protocol(_) => -32004,
            Self::State(_) => -32005,
            Self::Consistency(_) => -32006,
            Self::Renderer(_) => -32007,
            Self::Unauthorized => -32010,
        }
    }
}

impl ErrorCode for CoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Keystore(e) => e.code(),
            Self::Network(e) => e.code(),
            Self::Protocol(e) => e.code(),
            Self::State(e) => e.code(),
            Self::Consistency(e) => e.code(),
            Self::Renderer(e) => e.code(),
            Self::Unauthorized => "AUTH_REQUIRED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        let e = CoreError::from(KeystoreError::WrongPassphrase);
        assert_eq!(e.code(), "KEYSTORE_WRONG_PASSPHRASE");
        assert_eq!(e.rpc_code(), -32002);

        let e = CoreError::Unauthorized;
        assert_eq!(e.code(), "AUTH_REQUIRED");
        assert_eq!(e.rpc_code(), -32010);
    }
}
