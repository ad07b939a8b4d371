//! Telemetry metric name constants.
//!
//! Centralised metric names for sluice components. Consumers install their
//! own `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `sluice_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `breaker` — circuit breaker name (e.g. "datastore")
//! - `scope` — rate limit scope: "ip", "user" or "endpoint"
//! - `state` — breaker state entered: "closed", "open" or "half_open"

/// Fresh cache hits served from the response store.
pub const CACHE_HITS_TOTAL: &str = "sluice_cache_hits_total";

/// Cache lookups that found nothing (or only an expired entry).
pub const CACHE_MISSES_TOTAL: &str = "sluice_cache_misses_total";

/// Entries evicted by capacity pressure.
pub const CACHE_EVICTIONS_TOTAL: &str = "sluice_cache_evictions_total";

/// Callers that joined an already in-flight operation instead of starting one.
pub const COALESCED_TOTAL: &str = "sluice_coalesced_total";

/// In-flight operations force-failed by the coalescing deadline.
pub const COALESCING_TIMEOUTS_TOTAL: &str = "sluice_coalescing_timeouts_total";

/// Breaker state transitions.
///
/// Labels: `breaker`, `state`.
pub const BREAKER_TRANSITIONS_TOTAL: &str = "sluice_breaker_transitions_total";

/// Calls rejected by an open breaker without reaching the upstream.
///
/// Labels: `breaker`.
pub const BREAKER_REJECTIONS_TOTAL: &str = "sluice_breaker_rejections_total";

/// Duration of upstream calls made through a breaker, in seconds.
///
/// Labels: `breaker`, `status` ("ok" | "error").
pub const UPSTREAM_DURATION_SECONDS: &str = "sluice_upstream_duration_seconds";

/// Requests rejected for exceeding a rate limit.
///
/// Labels: `scope`.
pub const RATE_LIMITED_TOTAL: &str = "sluice_rate_limited_total";

/// Conditional requests answered with `304 Not Modified`.
pub const NOT_MODIFIED_TOTAL: &str = "sluice_not_modified_total";
