//! Sluice error types

use std::time::Duration;

use http::StatusCode;

/// Sluice error types.
///
/// Errors are `Clone` because a single coalesced outcome is delivered to
/// every waiting subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SluiceError {
    // Coalescing errors
    #[error("coalesced operation for '{key}' timed out after {timeout:?}")]
    CoalescingTimeout { key: String, timeout: Duration },

    /// The task driving an in-flight operation went away without publishing
    /// an outcome (panic or runtime shutdown).
    #[error("in-flight operation for '{key}' was abandoned")]
    Abandoned { key: String },

    // Breaker errors
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    // Upstream errors, propagated unchanged
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("upstream error ({status}): {message}")]
    UpstreamStatus { status: u16, message: String },

    // Admission errors
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration, limit: u32 },

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SluiceError {
    /// Whether the request was turned away without touching the upstream.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SluiceError::CircuitOpen { .. } | SluiceError::RateLimited { .. }
        )
    }

    /// Retry hint for the caller, if the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SluiceError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// HTTP status the routing layer should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SluiceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            SluiceError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SluiceError::CoalescingTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            SluiceError::Abandoned { .. }
            | SluiceError::Upstream(_)
            | SluiceError::UpstreamStatus { .. } => StatusCode::BAD_GATEWAY,
            SluiceError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<toml::de::Error> for SluiceError {
    fn from(err: toml::de::Error) -> Self {
        SluiceError::Configuration(err.to_string())
    }
}

/// Result type alias for Sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;
