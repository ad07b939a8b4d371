//! Response produced by the pipeline

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

/// Where the body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the response store.
    Hit,
    /// Fetched from the upstream (possibly by another coalesced caller).
    Miss,
    /// Not cacheable: non-read method or no matching policy.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// Status, headers and body for the routing layer to emit.
#[derive(Debug, Clone)]
pub struct ServedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cache_status: CacheStatus,
    /// Body is large enough that the routing layer should compress it.
    pub compressible: bool,
}

impl ServedResponse {
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
