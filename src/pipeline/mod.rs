//! The request pipeline composing every component.
//!
//! For each inbound request [`Sluice::serve`] runs:
//!
//! 1. rate limiting: every applicable rule, rejecting on the first one over
//!    budget;
//! 2. for reads (GET/HEAD): policy lookup, then the response store;
//! 3. on a miss, the coalescer, so concurrent identical reads share one
//!    upstream call;
//! 4. the upstream, through the circuit breaker;
//! 5. on success, store population with the route's `max-age` as TTL and a
//!    fingerprint computed once for the fresh body;
//! 6. conditional-request handling and header emission per caller.
//!
//! Non-read requests skip steps 2, 3 and 5.
//!
//! Every component is optional and owned through an `Arc`.

mod builder;

pub use builder::SluiceBuilder;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tracing::debug;

use crate::breaker::CircuitBreaker;
use crate::cache::{CachePolicy, CachedBody, PolicyTable, TtlStore, Visibility, etag};
use crate::coalesce::Coalescer;
use crate::config::CompressionConfig;
use crate::headers;
use crate::maintenance::{self, MaintenanceHandle, Sweep};
use crate::rate_limit::{RateLimitDecision, RateLimitRule, RateLimitScope, RateLimiter};
use crate::telemetry;
use crate::types::{CacheStatus, InboundRequest, ServedResponse};
use crate::upstream::Upstream;
use crate::{Result, SluiceError};

/// Main entry point: a configured pipeline in front of one upstream.
pub struct Sluice {
    upstream: Arc<dyn Upstream>,
    breaker: Option<Arc<CircuitBreaker>>,
    store: Option<Arc<TtlStore<CachedBody>>>,
    coalescer: Option<Arc<Coalescer<CachedBody>>>,
    limiter: Option<Arc<RateLimiter>>,
    rules: Vec<RateLimitRule>,
    policies: PolicyTable,
    compression: CompressionConfig,
    sweep_targets: Vec<Arc<dyn Sweep>>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl Sluice {
    /// Create a new builder for configuring the pipeline.
    pub fn builder() -> SluiceBuilder {
        SluiceBuilder::new()
    }

    /// Serve a request, or explain why it could not be served.
    ///
    /// Errors are [`SluiceError::RateLimited`], [`SluiceError::CircuitOpen`],
    /// [`SluiceError::CoalescingTimeout`] or the upstream's own failure.
    pub async fn serve(&self, request: &InboundRequest) -> Result<ServedResponse> {
        let decision = self.admit(request)?;

        let mut response = if request.is_read() {
            let policy = self.policies.lookup(&request.path);
            self.serve_read(request, policy).await?
        } else {
            self.pass_through(request).await?
        };

        if let Some(decision) = decision {
            headers::apply_rate_limit_headers(&mut response.headers, &decision);
        }
        Ok(response)
    }

    /// Like [`serve`](Self::serve), but turns errors into the response the
    /// routing layer should emit (429 with `retryAfter`, 503, 504, 502).
    pub async fn handle(&self, request: &InboundRequest) -> ServedResponse {
        match self.serve(request).await {
            Ok(response) => response,
            Err(error) => {
                debug!(path = %request.path, error = %error, "request not served");
                headers::error_response(&error)
            }
        }
    }

    /// Check every applicable rate limit rule.
    ///
    /// Returns the decision with the fewest remaining requests, for the
    /// `X-RateLimit-*` headers. A rejected request is not counted against
    /// any rule: rules it already passed get their slot back.
    fn admit(&self, request: &InboundRequest) -> Result<Option<RateLimitDecision>> {
        let Some(limiter) = &self.limiter else {
            return Ok(None);
        };

        let mut tightest: Option<RateLimitDecision> = None;
        let mut counted: Vec<(&RateLimitRule, String)> = Vec::new();
        for rule in self.rules.iter().filter(|r| r.applies_to(&request.path)) {
            let identity = match rule.scope {
                RateLimitScope::Ip => request.client_ip.clone(),
                RateLimitScope::User => match &request.user_id {
                    Some(user) => user.clone(),
                    None => continue,
                },
                RateLimitScope::Endpoint => format!("{}|{}", request.path, request.client_ip),
            };

            let decision = limiter.check_rule(rule, &identity);
            if !decision.allowed {
                for (passed, identity) in &counted {
                    limiter.release_rule(passed, identity);
                }
                return Err(SluiceError::RateLimited {
                    retry_after: decision.retry_after(),
                    limit: decision.limit,
                });
            }
            if tightest.is_none_or(|t| decision.remaining < t.remaining) {
                tightest = Some(decision);
            }
            counted.push((rule, identity));
        }
        Ok(tightest)
    }

    async fn serve_read(
        &self,
        request: &InboundRequest,
        policy: Option<&CachePolicy>,
    ) -> Result<ServedResponse> {
        let key = cache_key(request, policy);
        let store = policy.and(self.store.as_ref());

        if let Some(cached) = store.and_then(|s| s.get(&key)) {
            debug!(key = %key, "serving from cache");
            return Ok(self.respond(request, policy, cached, CacheStatus::Hit));
        }

        let fill = fill_operation(
            Arc::clone(&self.upstream),
            request.clone(),
            key.clone(),
            store.cloned(),
            policy.map(|p| p.max_age),
        );
        let cached = match &self.coalescer {
            Some(coalescer) => coalescer.run(key, fill).await?,
            None => fill().await?,
        };

        let status = if store.is_some() {
            CacheStatus::Miss
        } else {
            CacheStatus::Bypass
        };
        Ok(self.respond(request, policy, cached, status))
    }

    async fn pass_through(&self, request: &InboundRequest) -> Result<ServedResponse> {
        let body = self.upstream.fetch(request).await?;
        let mut headers = HeaderMap::new();
        headers::apply_cache_status(&mut headers, CacheStatus::Bypass);
        Ok(ServedResponse {
            status: StatusCode::OK,
            compressible: self.compression.should_compress(body.len()),
            headers,
            body,
            cache_status: CacheStatus::Bypass,
        })
    }

    /// Build the per-caller response, answering `304` when the caller's
    /// `If-None-Match` matches the fingerprint.
    fn respond(
        &self,
        request: &InboundRequest,
        policy: Option<&CachePolicy>,
        cached: CachedBody,
        cache_status: CacheStatus,
    ) -> ServedResponse {
        let mut headers = HeaderMap::new();
        match policy {
            Some(policy) => headers::apply_cache_headers(&mut headers, policy, cached.etag.as_deref()),
            None => {
                if let Some(value) = cached.etag.as_deref().and_then(|t| t.parse().ok()) {
                    headers.insert(http::header::ETAG, value);
                }
            }
        }
        headers::apply_cache_status(&mut headers, cache_status);

        let not_modified = match (&request.if_none_match, &cached.etag) {
            (Some(header), Some(tag)) => etag::if_none_match(header, tag),
            _ => false,
        };
        if not_modified {
            metrics::counter!(telemetry::NOT_MODIFIED_TOTAL).increment(1);
            return ServedResponse {
                status: StatusCode::NOT_MODIFIED,
                headers,
                body: Bytes::new(),
                cache_status,
                compressible: false,
            };
        }

        let compressible = self.compression.should_compress(cached.body.len());
        let body = if request.method == Method::HEAD {
            Bytes::new()
        } else {
            cached.body
        };
        ServedResponse {
            status: StatusCode::OK,
            headers,
            body,
            cache_status,
            compressible,
        }
    }

    /// Run one maintenance sweep now. Returns the number of entries reclaimed.
    pub fn sweep(&self) -> usize {
        maintenance::sweep_all(&self.sweep_targets)
    }

    /// Stop the background maintenance task, if running.
    pub async fn shutdown(&self) {
        let handle = self
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    pub fn is_maintenance_running(&self) -> bool {
        self.maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(MaintenanceHandle::is_running)
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn store(&self) -> Option<&Arc<TtlStore<CachedBody>>> {
        self.store.as_ref()
    }

    pub fn coalescer(&self) -> Option<&Arc<Coalescer<CachedBody>>> {
        self.coalescer.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }
}

/// Cache and coalescing key for a read.
///
/// Private responses are keyed per caller so one user's body is never
/// served to another.
fn cache_key(request: &InboundRequest, policy: Option<&CachePolicy>) -> String {
    let target = request.path_and_query();
    match policy.map(|p| p.visibility) {
        Some(Visibility::Private) => {
            let owner = request.user_id.as_deref().unwrap_or(&request.client_ip);
            format!("{target}#{owner}")
        }
        _ => target,
    }
}

/// The single upstream call made on a miss. Populates the store on success
/// so the fill happens once per coalesced group.
fn fill_operation(
    upstream: Arc<dyn Upstream>,
    request: InboundRequest,
    key: String,
    store: Option<Arc<TtlStore<CachedBody>>>,
    ttl: Option<Duration>,
) -> impl FnOnce() -> futures_util::future::BoxFuture<'static, Result<CachedBody>> + Send + 'static
{
    move || {
        Box::pin(async move {
            let body = upstream.fetch(&request).await?;
            let cached = CachedBody::new(body);
            if let (Some(store), Some(ttl)) = (store, ttl) {
                store.set_with_ttl(key, cached.clone(), ttl);
            }
            Ok(cached)
        })
    }
}
