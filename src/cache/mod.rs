//! Response caching subsystem.
//!
//! - [`store::TtlStore`] — bounded in-memory map with per-entry TTL and
//!   strict LRU eviction. Generic over the value type; the pipeline stores
//!   [`CachedBody`] values.
//!
//! - [`policy::PolicyTable`] — per-route [`CachePolicy`] lookup and
//!   `Cache-Control` rendering.
//!
//! - [`etag`] — content fingerprints and `If-None-Match` matching.

pub mod etag;
pub mod policy;
pub mod store;

pub use policy::{CachePolicy, PolicyTable, RoutePattern, Visibility};
pub use store::{CacheConfig, CacheEntry, StoreStats, TtlStore};

use bytes::Bytes;

/// A response body together with its precomputed fingerprint.
///
/// The fingerprint is computed once when the upstream fills the entry, not
/// on every hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBody {
    pub body: Bytes,
    pub etag: Option<String>,
}

impl CachedBody {
    pub fn new(body: Bytes) -> Self {
        let etag = etag::fingerprint(&body);
        Self { body, etag }
    }
}
