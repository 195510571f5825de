//! HMAC-SHA256 payload signing.
//!
//! Receivers recompute the MAC over the exact request body and compare it
//! against the `X-Signature: hmac-sha256=<hex>` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";
/// Header echoing the per-subscription delivery sequence.
pub const SEQUENCE_HEADER: &str = "X-Sequence";

const SCHEME_PREFIX: &str = "hmac-sha256=";

/// Compute the signature header value for `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length; new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(body);
    format!(
        "{SCHEME_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Verify a signature header value against `body`. Constant-time on the
/// MAC comparison.
pub fn verify(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_mac) = header_value.strip_prefix(SCHEME_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_mac) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
