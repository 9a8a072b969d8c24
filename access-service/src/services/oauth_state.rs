//! Stateless signed OAuth `state` parameter.
//!
//! Token layout: `base64url(nonce "." issued_at "." hex(hmac(nonce "." issued_at)))`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use rand::RngCore;
use service_core::utils::signature::{generate_signature, verify_signature};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Malformed state")]
    Malformed,
    #[error("Invalid state signature")]
    BadSignature,
    #[error("State expired")]
    Expired,
}

#[derive(Clone)]
pub struct StateSigner {
    secret: Vec<u8>,
    max_age_seconds: i64,
}

impl StateSigner {
    pub fn new(secret: &str, max_age_seconds: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            max_age_seconds,
        }
    }

    /// Mint a state token for a fresh random nonce.
    pub fn issue(&self) -> Result<String, anyhow::Error> {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.sign(&hex::encode(nonce), Utc::now().timestamp())
    }

    fn sign(&self, nonce: &str, issued_at: i64) -> Result<String, anyhow::Error> {
        let payload = format!("{}.{}", nonce, issued_at);
        let mac = generate_signature(&self.secret, payload.as_bytes())?;
        Ok(URL_SAFE_NO_PAD.encode(format!("{}.{}", payload, mac)))
    }

    /// Verify a token and return its nonce.
    pub fn verify(&self, token: &str) -> Result<String, StateError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    fn verify_at(&self, token: &str, now: i64) -> Result<String, StateError> {
        let decoded = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| StateError::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| StateError::Malformed)?;

        let mut parts = decoded.splitn(3, '.');
        let (nonce, issued_at, mac) = match (parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(t), Some(m)) if !n.is_empty() => (n, t, m),
            _ => return Err(StateError::Malformed),
        };

        let payload = format!("{}.{}", nonce, issued_at);
        let valid = verify_signature(&self.secret, payload.as_bytes(), mac)
            .map_err(|_| StateError::BadSignature)?;
        if !valid {
            return Err(StateError::BadSignature);
        }

        let issued_at: i64 = issued_at.parse().map_err(|_| StateError::Malformed)?;
        if now - issued_at > self.max_age_seconds || issued_at - now > 60 {
            return Err(StateError::Expired);
        }

        Ok(nonce.to_string())
    }
}
