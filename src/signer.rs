// src/signer.rs
//! Feishu custom-bot request signature.
//!
//! The bot verifies `sign` by computing HMAC-SHA256 keyed with
//! `"{timestamp}\n{secret}"` over an empty message and base64-encoding the
//! digest (standard alphabet, padded). Any deviation makes every request fail
//! with a signature mismatch, so this must stay bit-for-bit identical.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign `timestamp` (unix seconds, decimal) with the bot `secret`.
pub fn sign(timestamp: &str, secret: &str) -> String {
    let string_to_sign = format!("{timestamp}\n{secret}");
    let mac = HmacSha256::new_from_slice(string_to_sign.as_bytes())
        .expect("hmac accepts keys of any length");
    STANDARD.encode(mac.finalize().into_bytes())
}
