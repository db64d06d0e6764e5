//! Ed25519 signing, thinly wrapped so the rest of the workspace never
//! touches the underlying library types directly.

use crate::CryptoError;
use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// An Ed25519 key pair. The 32-byte seed is the canonical serialized form
/// and is what the keystore encrypts.
pub struct Ed25519KeyPair {
    signing: ed25519_dalek::SigningKey,
}

/// A detached Ed25519 signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ed25519Signature(ed25519_dalek::Signature);

/// An Ed25519 public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ed25519PublicKey(ed25519_dalek::VerifyingKey);

/// A seed that scrubs itself from memory when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretSeed(pub [u8; 32]);

impl Ed25519KeyPair {
    /// Generates a fresh key pair from the OS entropy source.
    pub fn generate() -> Self {
        Self {
            signing: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstructs a key pair from its 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// Reconstructs a key pair from raw seed bytes of unchecked length.
    pub fn from_seed_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("expected a 32-byte seed".into()))?;
        Ok(Self::from_seed(&seed))
    }

    /// The 32-byte seed. Callers must keep this inside a [`SecretSeed`] or
    /// hand it straight to the keystore.
    pub fn seed(&self) -> SecretSeed {
        SecretSeed(self.signing.to_bytes())
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.signing.sign(message))
    }
}

impl Ed25519PublicKey {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("expected a 32-byte public key".into()))?;
        ed25519_dalek::VerifyingKey::from_bytes(&raw)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(format!("not a valid public key: {e}")))
    }

    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CryptoError> {
        self.0
            .verify(message, &signature.0)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl Ed25519Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        ed25519_dalek::Signature::from_slice(bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let pair = Ed25519KeyPair::generate();
        let sig = pair.sign(b"hive");
        pair.public_key().verify(b"hive", &sig).unwrap();
        assert!(pair.public_key().verify(b"hive!", &sig).is_err());
    }

    #[test]
    fn seed_reconstruction() {
        let pair = Ed25519KeyPair::generate();
        let seed = pair.seed();
        let again = Ed25519KeyPair::from_seed(&seed.0);
        assert_eq!(pair.public_key(), again.public_key());
    }

    #[test]
    fn signature_byte_round_trip() {
        let pair = Ed25519KeyPair::generate();
        let sig = pair.sign(b"payload");
        let restored = Ed25519Signature::from_bytes(&sig.to_bytes()).unwrap();
        pair.public_key().verify(b"payload", &restored).unwrap();
        assert!(Ed25519Signature::from_bytes(&[0u8; 12]).is_err());
    }
}
