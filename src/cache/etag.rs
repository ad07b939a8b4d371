//! Content fingerprints and conditional-request matching.
//!
//! The fingerprint is the first 16 bytes of the SHA-256 of the serialized
//! body, hex-encoded and quoted as a strong entity tag. It depends only on
//! the bytes, so it is stable across processes and restarts.

use sha2::{Digest, Sha256};

/// Compute the ETag for a response body. Empty bodies get no ETag.
pub fn fingerprint(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let digest = Sha256::digest(body);
    Some(format!("\"{}\"", hex::encode(&digest[..16])))
}

/// Whether an `If-None-Match` header value matches `etag`.
///
/// Handles `*`, comma-separated lists and weak validators (`W/"..."`),
/// using weak comparison as required for `If-None-Match`.
pub fn if_none_match(header: &str, etag: &str) -> bool {
    let etag = strip_weak(etag.trim());
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || (!candidate.is_empty() && strip_weak(candidate) == etag)
    })
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}
