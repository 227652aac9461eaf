// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Webhook payload signing and verification.
//!
//! The signature is HMAC-SHA256 over the verbatim serialized body.
//! Verification recomputes the MAC and compares in constant time, so a
//! receiver never leaks how many signature bytes matched.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Receivers should reject events older than this.
pub const MAX_EVENT_AGE_MS: i64 = 5 * 60 * 1000;

/// Sign a payload: `sha256=<hex>`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature header against a payload, in constant time.
pub fn verify(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_digest) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Replay guard: whether the event timestamp is recent enough.
pub fn is_fresh(timestamp_ms: i64, now_ms: i64) -> bool {
    now_ms.saturating_sub(timestamp_ms) <= MAX_EVENT_AGE_MS
}
