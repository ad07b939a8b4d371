//! Response headers and rejection bodies emitted at the HTTP boundary.
//!
//! The routing layer owns the actual HTTP exchange; these helpers decide
//! which headers go out:
//!
//! - `Cache-Control`, `ETag`, `Vary: Accept-Encoding` for cacheable reads
//! - `X-Cache: HIT|MISS|BYPASS`
//! - `X-RateLimit-Limit`, `X-RateLimit-Remaining`, `X-RateLimit-Reset`
//!   (seconds until the window resets)
//! - `Retry-After` plus a JSON `{"error": ..., "retryAfter": N}` body on 429

use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, RETRY_AFTER, VARY};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use crate::SluiceError;
use crate::cache::CachePolicy;
use crate::rate_limit::RateLimitDecision;
use crate::types::{CacheStatus, ServedResponse};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Set caching headers for a cacheable read.
pub fn apply_cache_headers(headers: &mut HeaderMap, policy: &CachePolicy, etag: Option<&str>) {
    if let Ok(value) = HeaderValue::from_str(&policy.cache_control()) {
        headers.insert(CACHE_CONTROL, value);
    }
    if let Some(value) = etag.and_then(|tag| HeaderValue::from_str(tag).ok()) {
        headers.insert(ETAG, value);
    }
    headers.insert(VARY, HeaderValue::from_static("accept-encoding"));
}

pub fn apply_cache_status(headers: &mut HeaderMap, status: CacheStatus) {
    headers.insert(X_CACHE, HeaderValue::from_static(status.as_str()));
}

/// Set the `X-RateLimit-*` headers from the most restrictive decision.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_in_secs));
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

/// Build the response for a request the pipeline could not serve.
///
/// Rate-limited requests get `429`, `Retry-After`, the `X-RateLimit-*`
/// headers and a `retryAfter` field; other errors map through
/// [`SluiceError::status_code`].
pub fn error_response(error: &SluiceError) -> ServedResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let retry_after = error.retry_after().map(|d| d.as_secs().max(1));
    if let (Some(secs), SluiceError::RateLimited { limit, .. }) = (retry_after, error) {
        headers.insert(RETRY_AFTER, HeaderValue::from(secs));
        apply_rate_limit_headers(
            &mut headers,
            &RateLimitDecision {
                allowed: false,
                limit: *limit,
                remaining: 0,
                reset_in_secs: secs,
            },
        );
    }

    let message = error.to_string();
    let body = serde_json::to_vec(&ErrorBody {
        error: &message,
        retry_after,
    })
    .unwrap_or_default();

    ServedResponse {
        status: error.status_code(),
        headers,
        body: Bytes::from(body),
        cache_status: CacheStatus::Bypass,
        compressible: false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn rate_limited_error_carries_retry_after() {
        let response = error_response(&SluiceError::RateLimited {
            retry_after: Duration::from_secs(42),
            limit: 100,
        });
        assert_eq!(response.status, http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.header("retry-after"), Some("42"));
        assert_eq!(response.header("x-ratelimit-remaining"), Some("0"));
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["retryAfter"], 42);
    }

    #[test]
    fn circuit_open_maps_to_503_without_retry_hint() {
        let response = error_response(&SluiceError::CircuitOpen {
            name: "datastore".into(),
        });
        assert_eq!(response.status, http::StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.header("retry-after").is_none());
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(body.get("retryAfter").is_none());
    }
}
