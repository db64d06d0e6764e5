//! The passphrase-encrypted key file guarding the node's Ed25519 seed.
//!
//! Format V1:
//! ```text
//! [ Magic: "RHIVKEYS" (8) ]
//! [ Version: u16 (2) ]
//! [ KDF Algo: u8 (1) ]
//! [ KDF Mem KiB: u32 (4) ]
//! [ KDF Iters: u32 (4) ]
//! [ KDF Lanes: u8 (1) ]
//! [ Salt: 16B ]
//! [ AEAD Algo: u8 (1) ]
//! [ Nonce: 12B ]
//! [ Ciphertext + Tag: N + 16 ]
//! ```
//! All multi-byte header fields are big-endian so the on-disk layout is
//! endian-independent; the KDF parameters recorded in the header are the
//! ones actually applied on decryption.

use crate::CryptoError;
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::{rngs::OsRng, RngCore};
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

const HEADER_MAGIC: &[u8; 8] = b"RHIVKEYS";
const HEADER_VERSION: u16 = 1;
const HEADER_LEN: usize = 8 + 2 + 1 + 4 + 4 + 1 + 16 + 1 + 12;

const KDF_ALGO_ARGON2ID: u8 = 1;
const KDF_MEM_KIB: u32 = 64 * 1024;
const KDF_ITERS: u32 = 3;
const KDF_LANES: u8 = 4;
const SALT_LEN: usize = 16;
const AEAD_ALGO_CHACHA20POLY1305: u8 = 1;
const NONCE_LEN: usize = 12;
const KEK_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// A container for decrypted key material that zeroizes on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SensitiveBytes(pub Vec<u8>);

fn derive_kek(
    passphrase: &str,
    salt: &[u8],
    mem_kib: u32,
    iters: u32,
    lanes: u8,
) -> Result<[u8; KEK_LEN], CryptoError> {
    let params = Params::new(mem_kib, iters, lanes as u32, Some(KEK_LEN))
        .map_err(|e| CryptoError::OperationFailed(format!("Argon2 parameters: {e}")))?;
    let kdf = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut kek = [0u8; KEK_LEN];
    kdf.hash_password_into(passphrase.as_bytes(), salt, &mut kek)
        .map_err(|e| CryptoError::OperationFailed(format!("Argon2 derivation failed: {e}")))?;
    Ok(kek)
}

/// Encrypts raw key bytes under a passphrase, producing a V1 blob.
pub fn encrypt_key(secret: &[u8], passphrase: &str) -> Result<Vec<u8>, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(HEADER_MAGIC);
    header.extend_from_slice(&HEADER_VERSION.to_be_bytes());
    header.push(KDF_ALGO_ARGON2ID);
    header.extend_from_slice(&KDF_MEM_KIB.to_be_bytes());
    header.extend_from_slice(&KDF_ITERS.to_be_bytes());
    header.push(KDF_LANES);
    header.extend_from_slice(&salt);
    header.push(AEAD_ALGO_CHACHA20POLY1305);
    header.extend_from_slice(&nonce_bytes);
    debug_assert_eq!(header.len(), HEADER_LEN);

    let mut kek = derive_kek(passphrase, &salt, KDF_MEM_KIB, KDF_ITERS, KDF_LANES)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&kek));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), secret)
        .map_err(|_| CryptoError::OperationFailed("encryption failed".into()))?;
    kek.zeroize();

    let mut output = header;
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypts a V1 blob under a passphrase, honoring the header parameters.
pub fn decrypt_key(data: &[u8], passphrase: &str) -> Result<SensitiveBytes, CryptoError> {
    if data.len() < HEADER_LEN + TAG_LEN {
        return Err(CryptoError::InvalidInput("key file too short".into()));
    }
    if &data[0..8] != HEADER_MAGIC {
        return Err(CryptoError::InvalidInput("invalid key file signature".into()));
    }
    let version = u16::from_be_bytes([data[8], data[9]]);
    if version != HEADER_VERSION {
        return Err(CryptoError::Unsupported(format!(
            "key format version {version}"
        )));
    }
    if data[10] != KDF_ALGO_ARGON2ID {
        return Err(CryptoError::Unsupported(format!("KDF algorithm {}", data[10])));
    }
    let mem_kib = u32::from_be_bytes([data[11], data[12], data[13], data[14]]);
    let iters = u32::from_be_bytes([data[15], data[16], data[17], data[18]]);
    let lanes = data[19];
    let salt = &data[20..36];
    if data[36] != AEAD_ALGO_CHACHA20POLY1305 {
        return Err(CryptoError::Unsupported(format!("AEAD algorithm {}", data[36])));
    }
    let nonce_bytes = &data[37..49];
    let ciphertext = &data[HEADER_LEN..];

    let mut kek = derive_kek(passphrase, salt, mem_kib, iters, lanes)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&kek));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    kek.zeroize();

    Ok(SensitiveBytes(plaintext))
}

/// Encrypts and writes a key file with owner-only permissions.
pub fn save_encrypted_file(path: &Path, secret: &[u8], passphrase: &str) -> Result<(), CryptoError> {
    let blob = encrypt_key(secret, passphrase)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CryptoError::OperationFailed(format!("create {}: {e}", parent.display())))?;
    }
    std::fs::write(path, &blob)
        .map_err(|e| CryptoError::OperationFailed(format!("write {}: {e}", path.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| CryptoError::OperationFailed(format!("chmod {}: {e}", path.display())))?;
    }
    Ok(())
}

/// Reads and decrypts a key file.
pub fn load_encrypted_file(path: &Path, passphrase: &str) -> Result<SensitiveBytes, CryptoError> {
    let blob = std::fs::read(path)
        .map_err(|e| CryptoError::InvalidInput(format!("read {}: {e}", path.display())))?;
    decrypt_key(&blob, passphrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_v1() {
        let secret = b"node_seed_exactly_32_bytes_long!";
        let encrypted = encrypt_key(secret, "p@ss").unwrap();

        assert_eq!(&encrypted[0..8], HEADER_MAGIC);
        assert_eq!(encrypted.len(), HEADER_LEN + secret.len() + TAG_LEN);

        let decrypted = decrypt_key(&encrypted, "p@ss").unwrap();
        assert_eq!(decrypted.0, secret);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let encrypted = encrypt_key(b"secret", "p@ss").unwrap();
        assert!(matches!(
            decrypt_key(&encrypted, "wrong"),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn tampered_salt_fails_authentication() {
        // Flipping a salt bit changes the derived KEK, which must surface as
        // an AEAD tag failure rather than bad plaintext.
        let mut encrypted = encrypt_key(b"secret", "p@ss").unwrap();
        encrypted[25] ^= 0xff;
        assert!(decrypt_key(&encrypted, "p@ss").is_err());
    }

    #[test]
    fn truncated_file_is_rejected() {
        let encrypted = encrypt_key(b"secret", "p@ss").unwrap();
        assert!(decrypt_key(&encrypted[..HEADER_LEN], "p@ss").is_err());
        assert!(decrypt_key(b"RHIVKEYS", "p@ss").is_err());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00390079.key");
        save_encrypted_file(&path, b"seed", "p@ss").unwrap();
        let loaded = load_encrypted_file(&path, "p@ss").unwrap();
        assert_eq!(loaded.0, b"seed");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
