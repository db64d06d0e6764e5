use thiserror::Error;

/// Failures inside the crypto layer. The keystore maps these onto the
/// workspace-wide `KeystoreError` taxon at the service boundary.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("decryption failed (wrong passphrase or corrupted file)")]
    DecryptionFailed,
    #[error("unsupported format: {0}")]
    Unsupported(String),
    #[error("malformed input: {0}")]
    InvalidInput(String),
    #[error("operation failed: {0}")]
    OperationFailed(String),
}
