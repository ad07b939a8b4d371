//! Circuit breaker guarding an upstream dependency.
//!
//! [`CircuitBreaker`] is a three-state machine:
//!
//! - `Closed` — calls pass through; consecutive failures are counted.
//! - `Open` — calls fail immediately with [`SluiceError::CircuitOpen`]
//!   without invoking the operation.
//! - `HalfOpen` — trial calls pass through; enough successes close the
//!   breaker, any failure reopens it.
//!
//! The `Open → HalfOpen` transition is checked lazily on the next call
//! attempt; there is no background timer. State is only mutated by the
//! breaker's own success/failure hooks.
//!
//! [`CircuitBreakingUpstream`] applies a breaker to an [`Upstream`], in the
//! same decorator style as the other upstream wrappers.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::telemetry;
use crate::types::InboundRequest;
use crate::upstream::Upstream;
use crate::{Result, SluiceError};

/// Configuration for a circuit breaker.
///
/// ```rust
/// # use sluice::CircuitBreakerConfig;
/// # use std::time::Duration;
/// let config = CircuitBreakerConfig::new("datastore")
///     .failure_threshold(5)
///     .success_threshold(2)
///     .timeout(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name used in logs, metrics and [`SluiceError::CircuitOpen`].
    pub name: String,
    /// Consecutive failures that open the breaker. Default: 5.
    pub failure_threshold: u32,
    /// Successes in half-open needed to close it again. Default: 2.
    pub success_threshold: u32,
    /// Time after the last failure before a trial call is allowed. Default: 60s.
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "upstream".to_string(),
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    pub fn success_threshold(mut self, n: u32) -> Self {
        self.success_threshold = n;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Copy of the breaker's state and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<Instant>,
}

/// Three-state failure-isolation wrapper around fallible async operations.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerSnapshot>,
}

impl CircuitBreaker {
    /// Create a closed breaker. Zero thresholds are rejected.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self> {
        if config.failure_threshold == 0 || config.success_threshold == 0 {
            return Err(SluiceError::Configuration(format!(
                "breaker '{}': thresholds must be greater than zero",
                config.name
            )));
        }
        Ok(Self {
            config,
            inner: Mutex::new(BreakerSnapshot {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        *self.lock()
    }

    /// Run `operation` through the breaker.
    ///
    /// Fails with [`SluiceError::CircuitOpen`] while open, without invoking
    /// the operation. Otherwise returns the operation's own outcome
    /// unchanged and records it.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;

        let started = Instant::now();
        let result = operation().await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::histogram!(telemetry::UPSTREAM_DURATION_SECONDS,
            "breaker" => self.config.name.clone(),
            "status" => status,
        )
        .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => self.on_success(),
            Err(e) => self.on_failure(e),
        }
        result
    }

    fn admit(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let cooled_down = inner
            .last_failure_at
            .is_none_or(|at| Instant::now().saturating_duration_since(at) > self.config.timeout);
        if cooled_down {
            inner.success_count = 0;
            self.transition(&mut inner, CircuitState::HalfOpen);
            return Ok(());
        }

        metrics::counter!(telemetry::BREAKER_REJECTIONS_TOTAL,
            "breaker" => self.config.name.clone(),
        )
        .increment(1);
        debug!(breaker = %self.config.name, "rejecting call while open");
        Err(SluiceError::CircuitOpen {
            name: self.config.name.clone(),
        })
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.config.success_threshold {
                inner.success_count = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
        }
    }

    fn on_failure(&self, error: &SluiceError) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());
        debug!(
            breaker = %self.config.name,
            failures = inner.failure_count,
            error = %error,
            "recorded upstream failure"
        );

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.success_count = 0;
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut BreakerSnapshot, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        metrics::counter!(telemetry::BREAKER_TRANSITIONS_TOTAL,
            "breaker" => self.config.name.clone(),
            "state" => to.as_str(),
        )
        .increment(1);
        match to {
            CircuitState::Open => warn!(
                breaker = %self.config.name,
                from = from.as_str(),
                failures = inner.failure_count,
                "circuit opened"
            ),
            _ => info!(
                breaker = %self.config.name,
                from = from.as_str(),
                to = to.as_str(),
                "circuit state changed"
            ),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// CircuitBreakingUpstream
// ============================================================================

/// Decorator that routes every [`Upstream::fetch`] through a breaker.
pub struct CircuitBreakingUpstream {
    inner: Arc<dyn Upstream>,
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakingUpstream {
    pub fn new(inner: Arc<dyn Upstream>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl Upstream for CircuitBreakingUpstream {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(&self, request: &InboundRequest) -> Result<Bytes> {
        self.breaker.execute(|| self.inner.fetch(request)).await
    }
}
