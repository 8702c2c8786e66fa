//! Webhook signature verification.
//!
//! Senders sign the raw request body with HMAC-SHA256 using the shared secret
//! and send the lowercase hex digest in the `X-Signature` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded body signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Compute the hex-encoded HMAC-SHA256 of `body` keyed by `secret`.
///
/// Returns `None` if the key is rejected by the MAC.
pub fn compute_signature(secret: &[u8], body: &[u8]) -> Option<String> {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => {
            warn!(key_length = secret.len(), "webhook_signature_invalid_key");
            return None;
        }
    };

    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a webhook body signature.
///
/// # Arguments
///
/// * `secret` - The shared webhook secret
/// * `body` - The raw request body, exactly as received
/// * `signature` - The `X-Signature` header value
///
/// # Returns
///
/// `true` only if `signature` equals the hex HMAC-SHA256 of `body`.
/// An empty secret, empty signature or any mismatch yields `false`.
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_signature = !signature.is_empty(),
            "webhook_signature_missing_fields"
        );
        return false;
    }

    let Some(expected_signature) = compute_signature(secret, body) else {
        return false;
    };

    // Constant-time comparison to prevent timing attacks
    let valid: bool = expected_signature
        .as_bytes()
        .ct_eq(signature.as_bytes())
        .into();

    if !valid {
        warn!(
            expected_length = expected_signature.len(),
            actual_length = signature.len(),
            "webhook_signature_mismatch"
        );
    }

    valid
}
