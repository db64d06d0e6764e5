//! The bearer token carried in the session cookie.
//!
//! Shape: `base64url(claims JSON) "." base64url(Ed25519 signature)`, signed
//! by the session-only pair.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use renderhive_crypto::sign::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// The node's ledger account address.
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: u64,
}

pub(crate) fn mint(keys: &Ed25519KeyPair, subject: &str, expires_at: SystemTime) -> String {
    let claims = TokenClaims {
        sub: subject.to_owned(),
        exp: expires_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    };
    // serde_json can only fail on non-string keys; claims have none.
    let body = serde_json::to_vec(&claims).unwrap_or_default();
    let signature = keys.sign(&body);
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&body),
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    )
}

pub(crate) fn verify(public_key: &Ed25519PublicKey, token: &str) -> Result<TokenClaims, ()> {
    let (body_b64, sig_b64) = token.split_once('.').ok_or(())?;
    let body = URL_SAFE_NO_PAD.decode(body_b64).map_err(|_| ())?;
    let sig_bytes = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| ())?;
    let signature = Ed25519Signature::from_bytes(&sig_bytes).map_err(|_| ())?;
    public_key.verify(&body, &signature).map_err(|_| ())?;

    let claims: TokenClaims = serde_json::from_slice(&body).map_err(|_| ())?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    if claims.exp <= now {
        return Err(());
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn mint_verify_round_trip() {
        let keys = Ed25519KeyPair::generate();
        let token = mint(&keys, "0.0.4117950", SystemTime::now() + Duration::from_secs(3600));
        let claims = verify(&keys.public_key(), &token).unwrap();
        assert_eq!(claims.sub, "0.0.4117950");
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = Ed25519KeyPair::generate();
        let token = mint(&keys, "0.0.1", SystemTime::now() - Duration::from_secs(1));
        assert!(verify(&keys.public_key(), &token).is_err());
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let keys = Ed25519KeyPair::generate();
        let other = Ed25519KeyPair::generate();
        let token = mint(&keys, "0.0.1", SystemTime::now() + Duration::from_secs(60));
        assert!(verify(&other.public_key(), &token).is_err());
        assert!(verify(&keys.public_key(), "garbage").is_err());
        assert!(verify(&keys.public_key(), "a.b").is_err());
    }
}
