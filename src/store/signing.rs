//! HMAC-SHA256 signatures for the local backend's time-limited URLs.
//!
//! A signature covers the object key and the expiry timestamp, so neither can
//! be altered without invalidating the URL.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signed url has expired")]
    Expired,
    #[error("malformed signature")]
    Malformed,
    #[error("signature does not match")]
    Mismatch,
}

#[derive(Clone)]
pub struct UrlSigner {
    secret: Arc<[u8]>,
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    /// Signer with a random 256-bit secret. URLs it issues stop verifying
    /// once the process exits.
    pub fn ephemeral() -> Self {
        let mut secret = Vec::with_capacity(32);
        secret.extend_from_slice(Uuid::new_v4().as_bytes());
        secret.extend_from_slice(Uuid::new_v4().as_bytes());
        Self::new(secret)
    }

    fn mac(&self, key: &str, expires_at: i64) -> Result<HmacSha256, SignatureError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| SignatureError::Malformed)?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires_at.to_string().as_bytes());
        Ok(mac)
    }

    /// Signature for `key`, valid until the unix timestamp `expires_at`.
    pub fn sign(&self, key: &str, expires_at: i64) -> Result<String, SignatureError> {
        let tag = self.mac(key, expires_at)?.finalize().into_bytes();
        Ok(URL_SAFE_NO_PAD.encode(tag))
    }

    /// Check a signature presented at unix time `now`.
    pub fn verify(
        &self,
        key: &str,
        expires_at: i64,
        signature: &str,
        now: i64,
    ) -> Result<(), SignatureError> {
        if now > expires_at {
            return Err(SignatureError::Expired);
        }
        let tag = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignatureError::Malformed)?;
        self.mac(key, expires_at)?
            .verify_slice(&tag)
            .map_err(|_| SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "media/images/0b6f3c1e.png";

    #[test]
    fn signature_round_trips_before_expiry() {
        let signer = UrlSigner::new("secret");
        let sig = signer.sign(KEY, 2_000).unwrap();
        assert_eq!(signer.verify(KEY, 2_000, &sig, 1_000), Ok(()));
    }

    #[test]
    fn expired_url_is_rejected() {
        let signer = UrlSigner::new("secret");
        let sig = signer.sign(KEY, 2_000).unwrap();
        assert_eq!(
            signer.verify(KEY, 2_000, &sig, 2_001),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn tampered_key_or_expiry_is_rejected() {
        let signer = UrlSigner::new("secret");
        let sig = signer.sign(KEY, 2_000).unwrap();
        assert_eq!(
            signer.verify("media/images/other.png", 2_000, &sig, 1_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            signer.verify(KEY, 9_000, &sig, 1_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            signer.verify(KEY, 2_000, "not base64!", 1_000),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn different_secrets_do_not_verify_each_other() {
        let a = UrlSigner::ephemeral();
        let b = UrlSigner::ephemeral();
        let sig = a.sign(KEY, 2_000).unwrap();
        assert_eq!(
            b.verify(KEY, 2_000, &sig, 1_000),
            Err(SignatureError::Mismatch)
        );
    }
}
