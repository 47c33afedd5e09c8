//! HMAC-SHA256 payload signing.
//!
//! The signature covers the JSON serialization of the payload's `data`
//! field only, not the full envelope, and is rendered as lowercase hex.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Sign `data` with `secret`, returning a lowercase hex digest.
pub fn sign(data: &serde_json::Value, secret: &str) -> Result<String, WebhookError> {
    let serialized = serde_json::to_string(data)?;
    sign_bytes(serialized.as_bytes(), secret)
}

/// Sign raw bytes with `secret`.
pub fn sign_bytes(payload: &[u8], secret: &str) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a received signature against `data` in constant time.
pub fn verify(data: &serde_json::Value, secret: &str, signature: &str) -> bool {
    let Ok(expected) = sign(data, secret) else {
        return false;
    };
    let provided = signature.trim().to_ascii_lowercase();
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
