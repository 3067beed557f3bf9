//! Entity tags.
//!
//! An ETag here is a strong validator derived from the response body: the
//! first 16 bytes of its SHA-256 digest, base64url-encoded and quoted. Equal
//! bodies always yield equal tags; the tag says nothing about which namespace
//! version produced it, that is carried by the key it is stored under.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Length of the digest prefix kept in the tag.
const DIGEST_PREFIX_LEN: usize = 16;

/// Compute the quoted strong ETag for `body`.
pub fn compute_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", URL_SAFE_NO_PAD.encode(&digest[..DIGEST_PREFIX_LEN]))
}

/// Strip an optional weak prefix so tags compare weakly (RFC 9110 §8.8.3.2).
fn opaque(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix("W/").unwrap_or(tag)
}

/// Whether an `If-None-Match` header value matches `etag`.
///
/// Accepts `*`, a single tag, or a comma-separated list of tags. Comparison
/// is weak, as the standard requires for `If-None-Match`.
pub fn if_none_match_matches(header: &str, etag: &str) -> bool {
    let header = header.trim();
    if header.is_empty() {
        return false;
    }
    if header == "*" {
        return true;
    }
    let wanted = opaque(etag);
    header
        .split(',')
        .map(opaque)
        .any(|candidate| !candidate.is_empty() && candidate == wanted)
}
