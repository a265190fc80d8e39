//! Signature verification for Razorpay payments and webhooks.
//!
//! Razorpay signs two things with HMAC-SHA256 and sends the hex digest:
//!
//! - checkout results: `payment_id + "|" + subscription_id`, keyed with the API key secret
//! - webhook deliveries: the raw request body, keyed with the webhook secret

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 and return the hex-encoded result (64 characters).
///
/// Returns `None` only if the HMAC implementation rejects the key, which
/// HMAC-SHA256 never does for any key length.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Verify the signature returned by the hosted checkout for a subscription
/// payment.
#[must_use]
pub fn verify_payment_signature(
    key_secret: &str,
    payment_id: &str,
    subscription_id: &str,
    signature: &str,
) -> bool {
    if key_secret.is_empty() {
        return false;
    }
    hmac_sha256_hex(key_secret, &format!("{payment_id}|{subscription_id}"))
        .is_some_and(|expected| constant_time_eq(&expected, signature.trim()))
}

/// Verify the `X-Razorpay-Signature` header of a webhook delivery.
#[must_use]
pub fn verify_webhook_signature(webhook_secret: &str, raw_body: &str, signature: &str) -> bool {
    if webhook_secret.is_empty() {
        return false;
    }
    hmac_sha256_hex(webhook_secret, raw_body)
        .is_some_and(|expected| constant_time_eq(&expected, signature.trim()))
}
