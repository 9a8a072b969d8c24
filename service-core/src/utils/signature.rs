use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Prefix used by `X-Hub-Signature-256` style headers.
pub const SHA256_PREFIX: &str = "sha256=";

/// Compute HMAC-SHA256 over raw bytes, hex encoded (lowercase, no prefix).
pub fn generate_signature(secret: &[u8], payload: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex encoded HMAC-SHA256 signature using constant-time comparison.
///
/// Malformed hex is reported as a mismatch, never as an error.
pub fn verify_signature(
    secret: &[u8],
    payload: &[u8],
    signature_hex: &str,
) -> Result<bool, anyhow::Error> {
    let provided = match hex::decode(signature_hex.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(false),
    };

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    if expected.len() != provided.len() {
        return Ok(false);
    }

    Ok(expected.as_slice().ct_eq(provided.as_slice()).into())
}

/// Extract the hex digest from a `sha256=<hex>` header value.
pub fn strip_sha256_prefix(header_value: &str) -> Option<&str> {
    header_value
        .trim()
        .strip_prefix(SHA256_PREFIX)
        .filter(|digest| !digest.is_empty())
}
