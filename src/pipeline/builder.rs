//! Builder for configuring pipeline instances

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use super::Sluice;
use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakingUpstream};
use crate::cache::{CacheConfig, CachePolicy, CachedBody, PolicyTable, TtlStore};
use crate::coalesce::{Coalescer, CoalescingConfig};
use crate::config::{CompressionConfig, Config};
use crate::maintenance::{self, DEFAULT_SWEEP_INTERVAL, Sweep};
use crate::rate_limit::{RateLimitRule, RateLimiter};
use crate::upstream::Upstream;
use crate::{Result, SluiceError};

/// Builder for [`Sluice`].
///
/// Components are opt-in: a component that is never configured is never
/// allocated. Background maintenance is on by default (every 60s) and
/// needs a tokio runtime at [`build`](Self::build) time.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use sluice::{CacheConfig, CachePolicy, CircuitBreakerConfig, Sluice};
/// # fn upstream() -> Arc<dyn sluice::upstream::Upstream> { unimplemented!() }
/// # async fn run() -> sluice::Result<()> {
/// let sluice = Sluice::builder()
///     .upstream(upstream())
///     .response_cache(CacheConfig::new().max_entries(5_000))
///     .circuit_breaker(CircuitBreakerConfig::new("datastore"))
///     .policy(
///         "/api/products",
///         CachePolicy::public(Duration::from_secs(600))
///             .stale_while_revalidate(Duration::from_secs(86_400)),
///     )
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SluiceBuilder {
    upstream: Option<Arc<dyn Upstream>>,
    cache: Option<CacheConfig>,
    coalescing: Option<CoalescingConfig>,
    breaker: Option<CircuitBreakerConfig>,
    rules: Vec<RateLimitRule>,
    policies: PolicyTable,
    compression: CompressionConfig,
    sweep_interval: Option<Duration>,
}

impl SluiceBuilder {
    pub fn new() -> Self {
        Self {
            upstream: None,
            cache: None,
            coalescing: None,
            breaker: None,
            rules: Vec::new(),
            policies: PolicyTable::new(),
            compression: CompressionConfig::default(),
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }

    /// Start from a loaded [`Config`], honouring each section's `enabled` flag.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::new()
            .policies(config.policy_table())
            .compression(config.compression.clone())
            .sweep_interval(config.sweep_interval());

        if config.cache.enabled {
            builder = builder.response_cache(config.cache.to_config());
        }
        if config.coalescing.enabled {
            builder = builder.coalescing(config.coalescing.to_config());
        }
        if config.breaker.enabled {
            builder = builder.circuit_breaker(config.breaker.to_config());
        }
        if config.rate_limit.enabled {
            for rule in config.rate_limit_rules() {
                builder = builder.rate_limit(rule);
            }
        }
        builder
    }

    /// The upstream operation to protect. Required.
    pub fn upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Enable the in-memory response store.
    pub fn response_cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Enable coalescing of concurrent identical reads.
    pub fn coalescing(mut self, config: CoalescingConfig) -> Self {
        self.coalescing = Some(config);
        self
    }

    /// Guard the upstream with a circuit breaker.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = Some(config);
        self
    }

    /// Add a rate limit rule. Rules are checked in insertion order.
    pub fn rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Replace the route policy table.
    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    /// Add one route policy.
    pub fn policy(mut self, route: &str, policy: CachePolicy) -> Self {
        self.policies.insert(route, policy);
        self
    }

    pub fn compression(mut self, config: CompressionConfig) -> Self {
        self.compression = config;
        self
    }

    /// Interval for the background sweep (default: 60s).
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Do not start the background sweep; call [`Sluice::sweep`] manually.
    pub fn disable_maintenance(mut self) -> Self {
        self.sweep_interval = None;
        self
    }

    /// Build the pipeline.
    ///
    /// Fails if no upstream is set, a component configuration is invalid,
    /// or maintenance is enabled outside a tokio runtime.
    pub fn build(self) -> Result<Sluice> {
        let upstream = self
            .upstream
            .ok_or_else(|| SluiceError::Configuration("no upstream configured".to_string()))?;

        let store = self
            .cache
            .as_ref()
            .map(TtlStore::<CachedBody>::new)
            .transpose()?
            .map(Arc::new);

        let breaker = self
            .breaker
            .map(CircuitBreaker::new)
            .transpose()?
            .map(Arc::new);

        let upstream: Arc<dyn Upstream> = match &breaker {
            Some(breaker) => Arc::new(CircuitBreakingUpstream::new(upstream, Arc::clone(breaker))),
            None => upstream,
        };

        let coalescer = self
            .coalescing
            .as_ref()
            .map(|config| Arc::new(Coalescer::<CachedBody>::new(config)));

        let limiter = (!self.rules.is_empty()).then(|| Arc::new(RateLimiter::new()));

        let mut sweep_targets: Vec<Arc<dyn Sweep>> = Vec::new();
        if let Some(store) = &store {
            sweep_targets.push(store.clone());
        }
        if let Some(coalescer) = &coalescer {
            sweep_targets.push(coalescer.clone());
        }
        if let Some(limiter) = &limiter {
            sweep_targets.push(limiter.clone());
        }

        let maintenance = match self.sweep_interval {
            Some(interval) if !sweep_targets.is_empty() => {
                if interval.is_zero() {
                    return Err(SluiceError::Configuration(
                        "sweep interval must be greater than zero".to_string(),
                    ));
                }
                if tokio::runtime::Handle::try_current().is_err() {
                    return Err(SluiceError::Configuration(
                        "background maintenance needs a tokio runtime; build inside one or call disable_maintenance()"
                            .to_string(),
                    ));
                }
                Some(maintenance::spawn(interval, sweep_targets.clone()))
            }
            _ => None,
        };

        info!(
            upstream = upstream.name(),
            cache = store.is_some(),
            coalescing = coalescer.is_some(),
            breaker = breaker.is_some(),
            rate_limit_rules = self.rules.len(),
            policies = self.policies.len(),
            "sluice pipeline built"
        );

        Ok(Sluice {
            upstream,
            breaker,
            store,
            coalescer,
            limiter,
            rules: self.rules,
            policies: self.policies,
            compression: self.compression,
            sweep_targets,
            maintenance: Mutex::new(maintenance),
        })
    }
}

impl Default for SluiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
