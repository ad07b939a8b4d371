//! Sluice - a performance and protection layer in front of an API backend
//!
//! This crate sits between a routing layer and a document-store-backed
//! upstream. It reduces redundant backend work and protects the backend from
//! overload with four cooperating mechanisms:
//!
//! - [`TtlStore`]: in-memory response cache with per-entry TTL and strict
//!   LRU eviction
//! - [`Coalescer`]: concurrent identical reads share one upstream call
//! - [`CircuitBreaker`]: stops calling a failing upstream until it recovers
//! - [`RateLimiter`]: fixed-window quotas per IP, user or endpoint
//!
//! plus a per-route [`PolicyTable`] that drives `Cache-Control`, `ETag` and
//! `304 Not Modified` handling. [`Sluice`] composes them into one pipeline.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use sluice::upstream::from_fn;
//! use sluice::{
//!     CacheConfig, CachePolicy, CircuitBreakerConfig, CoalescingConfig, InboundRequest,
//!     RateLimitRule, RateLimitScope, Sluice,
//! };
//!
//! #[tokio::main]
//! async fn main() -> sluice::Result<()> {
//!     let products = from_fn("products", |_request| {
//!         Box::pin(async { Ok(Bytes::from_static(br#"[{"id":"1"}]"#)) })
//!     });
//!
//!     let sluice = Sluice::builder()
//!         .upstream(Arc::new(products))
//!         .response_cache(CacheConfig::new().max_entries(10_000))
//!         .coalescing(CoalescingConfig::new())
//!         .circuit_breaker(CircuitBreakerConfig::new("datastore"))
//!         .rate_limit(RateLimitRule::new(RateLimitScope::Ip, 100, Duration::from_secs(60)))
//!         .policy(
//!             "/api/products",
//!             CachePolicy::public(Duration::from_secs(600))
//!                 .stale_while_revalidate(Duration::from_secs(86_400)),
//!         )
//!         .build()?;
//!
//!     let response = sluice
//!         .handle(&InboundRequest::get("/api/products").client_ip("203.0.113.7"))
//!         .await;
//!     println!("{} {:?}", response.status, response.header("etag"));
//!
//!     sluice.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod breaker;
pub mod cache;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod headers;
pub mod maintenance;
pub mod pipeline;
pub mod rate_limit;
pub mod telemetry;
pub mod types;
pub mod upstream;

// Re-export main types at crate root
pub use error::{Result, SluiceError};
pub use pipeline::{Sluice, SluiceBuilder};
pub use upstream::Upstream;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use cache::{
    CacheConfig, CachePolicy, CachedBody, PolicyTable, StoreStats, TtlStore, Visibility,
};
pub use coalesce::{Coalescer, CoalescingConfig};
pub use config::{CompressionConfig, Config};
pub use rate_limit::{RateLimitDecision, RateLimitRule, RateLimitScope, RateLimiter};
pub use types::{CacheStatus, InboundRequest, ServedResponse};
