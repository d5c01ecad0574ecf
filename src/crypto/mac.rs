//! HMAC-SHA256 tag computation and constant-time verification.

use crate::ScriptwardenError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Length of an HMAC-SHA256 tag in bytes.
pub const MAC_LEN: usize = 32;

/// Compute the raw HMAC-SHA256 tag of `message` under `secret`.
pub fn compute_tag(secret: &[u8], message: &[u8]) -> Result<[u8; MAC_LEN], ScriptwardenError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ScriptwardenError::ConfigError(format!("Invalid signing secret: {}", e)))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Compute the tag and encode it as unpadded base64url.
pub fn compute_tag_b64(secret: &[u8], message: &[u8]) -> Result<String, ScriptwardenError> {
    Ok(URL_SAFE_NO_PAD.encode(compute_tag(secret, message)?))
}

/// Verify a base64url tag against `message`.
///
/// # Returns
/// * `Ok(())` - Tag matches
/// * `Err(TokenMalformed)` - Tag is not valid base64url
/// * `Err(TokenInvalid)` - Tag does not match (compared in constant time)
pub fn verify_tag_b64(
    secret: &[u8],
    message: &[u8],
    tag_b64: &str,
) -> Result<(), ScriptwardenError> {
    let tag = URL_SAFE_NO_PAD
        .decode(tag_b64)
        .map_err(|_| ScriptwardenError::TokenMalformed)?;

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ScriptwardenError::ConfigError(format!("Invalid signing secret: {}", e)))?;
    mac.update(message);
    mac.verify_slice(&tag)
        .map_err(|_| ScriptwardenError::TokenInvalid)
}

/// SHA-256 of an arbitrary key, hex-encoded.
///
/// Used wherever a caller-controlled string becomes a filename.
pub fn hash_key(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}
