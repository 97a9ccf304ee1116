//! HMAC-SHA256 signing of outbound payloads.
//!
//! The signature covers `{timestamp}.{body}` so a captured request cannot be
//! replayed under a fresh timestamp. Receivers verify with
//! [`verify_signature_header`].

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the event id.
pub const HEADER_EVENT_ID: &str = "X-Courier-Event-ID";
/// Header carrying the delivery id.
pub const HEADER_DELIVERY_ID: &str = "X-Courier-Delivery-ID";
/// Header carrying the unix timestamp the signature was computed at.
pub const HEADER_TIMESTAMP: &str = "X-Courier-Timestamp";
/// Header carrying `sha256=<hex>`.
pub const HEADER_SIGNATURE: &str = "X-Courier-Signature";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the hex-encoded HMAC-SHA256 of `{timestamp}.{body}`.
pub fn compute_hmac_signature(
    secret: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<String, WebhookError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::Internal(format!("HMAC key rejected: {e}")))?;

    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Value for [`HEADER_SIGNATURE`].
pub fn signature_header(
    secret: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<String, WebhookError> {
    compute_hmac_signature(secret, timestamp, body).map(|hex| format!("{SIGNATURE_PREFIX}{hex}"))
}

/// Verify a `sha256=<hex>` header value in constant time.
pub fn verify_signature_header(header: &str, secret: &str, timestamp: &str, body: &[u8]) -> bool {
    let Some(expected_hex) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    match compute_hmac_signature(secret, timestamp, body) {
        Ok(computed) => constant_time_eq(expected_hex.as_bytes(), computed.as_bytes()),
        Err(_) => false,
    }
}

/// SECURITY: Uses the `subtle` crate for constant-time comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}
