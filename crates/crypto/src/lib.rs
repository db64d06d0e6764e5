#![forbid(unsafe_code)]

//! Cryptographic helpers for the Renderhive node coordinator: Ed25519
//! signing, SHA-256 digests, and the passphrase-encrypted keystore that
//! guards the node's private key at rest.

/// The versioned, passphrase-encrypted key file format.
pub mod keystore;
/// Ed25519 key pairs, signatures and verification.
pub mod sign;

mod error;

pub use error::CryptoError;

use sha2::{Digest, Sha256};

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derives a domain-separated 32-byte seed from existing key material.
///
/// Used to mint the session-only signing pair: the node key itself never
/// signs in the session context.
pub fn derive_seed(domain: &str, seed: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(seed);
    hasher.finalize().into()
}
