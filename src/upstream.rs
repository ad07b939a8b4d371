//! The upstream data operation the pipeline protects.
//!
//! The pipeline knows nothing about the upstream beyond success or failure.
//! Implementations wrap a route handler or data-store client; decorators
//! such as [`CircuitBreakingUpstream`](crate::breaker::CircuitBreakingUpstream)
//! wrap another `Upstream`.
//!
//! # Example
//!
//! ```rust
//! # use sluice::upstream::from_fn;
//! # use bytes::Bytes;
//! let upstream = from_fn("products", |request| {
//!     Box::pin(async move { Ok(Bytes::from(format!("{{\"path\":\"{}\"}}", request.path))) })
//! });
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::Result;
use crate::types::InboundRequest;

/// Produces the serialized response body for a request.
///
/// Errors should be [`SluiceError::Upstream`](crate::SluiceError::Upstream)
/// or [`SluiceError::UpstreamStatus`](crate::SluiceError::UpstreamStatus);
/// they are propagated to the caller unchanged and count as breaker failures.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Upstream name for logging/debugging.
    fn name(&self) -> &str;

    async fn fetch(&self, request: &InboundRequest) -> Result<Bytes>;
}

/// [`Upstream`] backed by a closure. Created with [`from_fn`].
pub struct FnUpstream<F> {
    name: String,
    f: F,
}

/// Wrap a closure returning a boxed future as an [`Upstream`].
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnUpstream<F>
where
    F: Fn(InboundRequest) -> BoxFuture<'static, Result<Bytes>> + Send + Sync,
{
    FnUpstream {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> Upstream for FnUpstream<F>
where
    F: Fn(InboundRequest) -> BoxFuture<'static, Result<Bytes>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: &InboundRequest) -> Result<Bytes> {
        (self.f)(request.clone()).await
    }
}
