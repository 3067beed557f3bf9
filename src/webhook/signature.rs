//! Webhook signature verification.
//!
//! Both providers sign the raw request body with HMAC. Verification must run
//! on the exact bytes received, before any JSON parsing, and compares digests
//! in constant time. Every failure mode, including a malformed header, is a
//! plain `false`.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

use super::events::Provider;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Verifies signatures for one provider.
#[derive(Clone)]
pub struct SignatureVerifier {
    provider: Provider,
    secret: String,
    tolerance: Duration,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("provider", &self.provider)
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    /// `tolerance` only applies to timestamped (Stripe) signatures.
    pub fn new(provider: Provider, secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            provider,
            secret: secret.into(),
            tolerance,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Check `header` against `raw_body` at the current time.
    pub fn verify_signature(&self, raw_body: &[u8], header: &str) -> bool {
        self.verify_at(raw_body, header, Utc::now().timestamp())
    }

    /// Check `header` against `raw_body` as of `now` (unix seconds).
    pub fn verify_at(&self, raw_body: &[u8], header: &str, now: i64) -> bool {
        match self.provider {
            Provider::Stripe => {
                verify_stripe(raw_body, header, &self.secret, self.tolerance, now)
            }
            Provider::Paystack => verify_paystack(raw_body, header, &self.secret),
        }
    }
}

/// Verify a `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]` header.
pub fn verify_stripe(
    raw_body: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> bool {
    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    candidates.push(bytes);
                }
            }
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };
    if now.abs_diff(timestamp) > tolerance.as_secs() {
        return false;
    }
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    let expected = mac.finalize().into_bytes();

    candidates
        .iter()
        .any(|candidate| bool::from(expected.as_slice().ct_eq(candidate.as_slice())))
}

/// Verify an `X-Paystack-Signature: <hex HMAC-SHA512 of body>` header.
pub fn verify_paystack(raw_body: &[u8], header: &str, secret: &str) -> bool {
    let Ok(provided) = hex::decode(header.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    let expected = mac.finalize().into_bytes();
    bool::from(expected.as_slice().ct_eq(provided.as_slice()))
}

/// Produce a Stripe signature header. Used by tests and local tooling.
pub fn sign_stripe(raw_body: &[u8], secret: &str, timestamp: i64) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Produce a Paystack signature header. Used by tests and local tooling.
pub fn sign_paystack(raw_body: &[u8], secret: &str) -> String {
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}
