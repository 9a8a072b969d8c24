//! Client secret generation and Argon2 hashing for service accounts.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;

/// Plaintext client secret. Never logged.
#[derive(Clone)]
pub struct ClientSecret(String);

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClientSecret(***)")
    }
}

impl ClientSecret {
    pub fn new(secret: String) -> Self {
        Self(secret)
    }

    /// 32 random bytes, base64url encoded.
    pub fn generate() -> Self {
        Self(random_token(32))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Argon2id hash in PHC string format, salt included. Runs on the
/// blocking pool.
pub async fn hash_secret(secret: &ClientSecret) -> Result<String, anyhow::Error> {
    let secret = secret.clone();
    tokio::task::spawn_blocking(move || hash_blocking(&secret)).await?
}

/// Returns `Ok(false)` on mismatch; errors only on an unreadable hash.
pub async fn verify_secret(secret: &ClientSecret, hash: &str) -> Result<bool, anyhow::Error> {
    let secret = secret.clone();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || verify_blocking(&secret, &hash)).await?
}

fn hash_blocking(secret: &ClientSecret) -> Result<String, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash client secret: {}", e))?
        .to_string();
    Ok(hash)
}

fn verify_blocking(secret: &ClientSecret, hash: &str) -> Result<bool, anyhow::Error> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Invalid secret hash format: {}", e))?;

    Ok(Argon2::default()
        .verify_password(secret.as_str().as_bytes(), &parsed)
        .is_ok())
}
