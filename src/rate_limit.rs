//! Fixed-window rate limiting keyed by caller identity.
//!
//! Each identity key owns a [`RateWindow`]: a request counter that resets
//! hard when the window ends. Bursts straddling a boundary can briefly exceed
//! the long-run rate; that is the accepted cost of the fixed-window scheme.
//!
//! Counters live in a [`DashMap`], so each `check` is atomic per key
//! (the shard lock is held for the read-modify-write) without serialising
//! unrelated identities.
//!
//! # Scopes
//!
//! [`RateLimitScope`] prefixes the identity key, so IP, user and endpoint
//! limits never share a counter even when the raw identity strings collide.

use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::telemetry;

/// Which caller attribute a limit is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitScope {
    /// Raw client IP.
    Ip,
    /// Authenticated user id. Anonymous requests are not counted.
    User,
    /// Endpoint path combined with the client IP.
    Endpoint,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitScope::Ip => "ip",
            RateLimitScope::User => "user",
            RateLimitScope::Endpoint => "endpoint",
        }
    }

    /// Counter key for `identity` within this scope.
    pub fn key(&self, identity: &str) -> String {
        format!("{}:{identity}", self.as_str())
    }
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    pub scope: RateLimitScope,
    pub max_requests: u32,
    pub window: Duration,
    /// Only apply to request paths starting with this prefix.
    pub path_prefix: Option<String>,
}

impl RateLimitRule {
    pub fn new(scope: RateLimitScope, max_requests: u32, window: Duration) -> Self {
        Self {
            scope,
            max_requests,
            window,
            path_prefix: None,
        }
    }

    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn applies_to(&self, path: &str) -> bool {
        self.path_prefix
            .as_deref()
            .is_none_or(|prefix| path.starts_with(prefix))
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Whole seconds until the window resets, rounded up (at least 1).
    pub reset_in_secs: u64,
}

impl RateLimitDecision {
    /// Retry hint for a rejected caller.
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.reset_in_secs)
    }
}

/// Counter state for one identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub window_reset_at: Instant,
}

/// Fixed-window counters for any number of identities.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request for `identity` against `max_requests` per `window`.
    ///
    /// Rejected requests are not counted.
    pub fn check(&self, identity: &str, max_requests: u32, window: Duration) -> RateLimitDecision {
        let window = window.max(Duration::from_millis(1));
        let now = Instant::now();

        let mut entry = self
            .windows
            .entry(identity.to_string())
            .or_insert_with(|| RateWindow {
                count: 0,
                window_reset_at: now + window,
            });
        let state = entry.value_mut();

        if now >= state.window_reset_at {
            state.window_reset_at = next_reset(state.window_reset_at, now, window);
            state.count = 0;
        }

        let allowed = state.count < max_requests;
        if allowed {
            state.count += 1;
        }

        RateLimitDecision {
            allowed,
            limit: max_requests,
            remaining: max_requests.saturating_sub(state.count),
            reset_in_secs: ceil_secs(state.window_reset_at.saturating_duration_since(now)),
        }
    }

    /// Apply a configured rule. `identity` is the scope's raw identity
    /// (IP, user id, or `path|ip` for endpoint scope).
    pub fn check_rule(&self, rule: &RateLimitRule, identity: &str) -> RateLimitDecision {
        let decision = self.check(&rule.scope.key(identity), rule.max_requests, rule.window);
        if !decision.allowed {
            metrics::counter!(telemetry::RATE_LIMITED_TOTAL, "scope" => rule.scope.as_str())
                .increment(1);
            debug!(
                scope = %rule.scope,
                identity,
                limit = rule.max_requests,
                reset_in_secs = decision.reset_in_secs,
                "rate limit exceeded"
            );
        }
        decision
    }

    /// Give back one request counted for `identity` in its current window.
    ///
    /// Used when a request passed this counter but was rejected by another
    /// rule. A window that has already rolled over is left alone.
    pub fn release(&self, identity: &str) {
        let now = Instant::now();
        if let Some(mut state) = self.windows.get_mut(identity) {
            if now < state.window_reset_at {
                state.count = state.count.saturating_sub(1);
            }
        }
    }

    /// [`release`](Self::release) for a configured rule.
    pub fn release_rule(&self, rule: &RateLimitRule, identity: &str) {
        self.release(&rule.scope.key(identity));
    }

    /// Remove windows that have already ended. Active windows are kept.
    ///
    /// Returns the number of windows removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, state| state.window_reset_at > now);
        before.saturating_sub(self.windows.len())
    }

    /// Current window for a raw counter key, if any.
    pub fn window(&self, key: &str) -> Option<RateWindow> {
        self.windows.get(key).map(|w| *w)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Advance `reset_at` by whole windows until it lies after `now`.
fn next_reset(reset_at: Instant, now: Instant, window: Duration) -> Instant {
    let behind = now.saturating_duration_since(reset_at);
    let periods = behind.as_nanos() / window.as_nanos() + 1;
    let periods = u32::try_from(periods).unwrap_or(u32::MAX);
    reset_at
        .checked_add(window.saturating_mul(periods))
        .unwrap_or(now + window)
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}
