//! Tests for [`CircuitBreaker`] and [`CircuitBreakingUpstream`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use sluice::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakingUpstream, CircuitState};
use sluice::types::InboundRequest;
use sluice::upstream::{Upstream, from_fn};
use sluice::{Result, SluiceError};

fn breaker(failures: u32, successes: u32, timeout: Duration) -> CircuitBreaker {
    CircuitBreaker::new(
        CircuitBreakerConfig::new("datastore")
            .failure_threshold(failures)
            .success_threshold(successes)
            .timeout(timeout),
    )
    .unwrap()
}

async fn fail(breaker: &CircuitBreaker) -> Result<()> {
    breaker
        .execute(|| async { Err(SluiceError::Upstream("down".to_string())) })
        .await
}

async fn succeed(breaker: &CircuitBreaker) -> Result<&'static str> {
    breaker.execute(|| async { Ok("ok") }).await
}

// =========================================================================
// Configuration
// =========================================================================

#[test]
fn config_defaults() {
    let config = CircuitBreakerConfig::default();
    assert_eq!(config.failure_threshold, 5);
    assert_eq!(config.success_threshold, 2);
    assert_eq!(config.timeout, Duration::from_secs(60));
}

#[test]
fn zero_thresholds_are_rejected() {
    let result = CircuitBreaker::new(CircuitBreakerConfig::new("x").failure_threshold(0));
    assert!(matches!(result, Err(SluiceError::Configuration(_))));

    let result = CircuitBreaker::new(CircuitBreakerConfig::new("x").success_threshold(0));
    assert!(matches!(result, Err(SluiceError::Configuration(_))));
}

#[test]
fn new_breaker_is_closed() {
    let breaker = breaker(5, 2, Duration::from_secs(60));
    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
    assert_eq!(snapshot.success_count, 0);
    assert!(snapshot.last_failure_at.is_none());
    assert_eq!(breaker.name(), "datastore");
}

// =========================================================================
// Closed
// =========================================================================

#[tokio::test]
async fn success_passes_result_through() {
    let breaker = breaker(5, 2, Duration::from_secs(60));
    assert_eq!(succeed(&breaker).await.unwrap(), "ok");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn failure_passes_error_through_unchanged() {
    let breaker = breaker(5, 2, Duration::from_secs(60));
    let err = fail(&breaker).await.unwrap_err();
    assert_eq!(err, SluiceError::Upstream("down".to_string()));
    assert_eq!(breaker.snapshot().failure_count, 1);
}

#[tokio::test]
async fn opens_at_failure_threshold() {
    let breaker = breaker(5, 2, Duration::from_secs(60));
    for _ in 0..4 {
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn success_in_closed_resets_failure_count() {
    let breaker = breaker(3, 2, Duration::from_secs(60));
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.snapshot().failure_count, 0);

    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
}

// =========================================================================
// Open
// =========================================================================

#[tokio::test(start_paused = true)]
async fn open_rejects_without_invoking_operation() {
    let breaker = breaker(1, 1, Duration::from_secs(60));
    let _ = fail(&breaker).await;

    let calls = AtomicUsize::new(0);
    let result = breaker
        .execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert_eq!(
        result.unwrap_err(),
        SluiceError::CircuitOpen {
            name: "datastore".to_string()
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn open_stays_open_until_timeout_has_fully_elapsed() {
    let breaker = breaker(1, 1, Duration::from_secs(60));
    let _ = fail(&breaker).await;

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(matches!(
        succeed(&breaker).await,
        Err(SluiceError::CircuitOpen { .. })
    ));
    assert_eq!(breaker.state(), CircuitState::Open);
}

// =========================================================================
// Recovery scenario: threshold 5, success threshold 2, timeout 60s
// =========================================================================

#[tokio::test(start_paused = true)]
async fn full_recovery_cycle() {
    let breaker = breaker(5, 2, Duration::from_millis(60_000));

    for _ in 0..5 {
        let _ = fail(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(matches!(
        succeed(&breaker).await,
        Err(SluiceError::CircuitOpen { .. })
    ));

    tokio::time::advance(Duration::from_millis(60_001)).await;

    // First call after the cool-down is admitted as a half-open probe.
    assert_eq!(succeed(&breaker).await.unwrap(), "ok");
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    assert_eq!(succeed(&breaker).await.unwrap(), "ok");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn failure_in_half_open_reopens() {
    let breaker = breaker(5, 2, Duration::from_millis(60_000));
    for _ in 0..5 {
        let _ = fail(&breaker).await;
    }
    tokio::time::advance(Duration::from_millis(60_001)).await;

    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    // A fresh cool-down starts from the half-open failure.
    assert!(matches!(
        succeed(&breaker).await,
        Err(SluiceError::CircuitOpen { .. })
    ));
    tokio::time::advance(Duration::from_millis(60_001)).await;
    succeed(&breaker).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
}

// =========================================================================
// CircuitBreakingUpstream
// =========================================================================

#[tokio::test(start_paused = true)]
async fn wrapped_upstream_is_not_called_while_open() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let inner = from_fn("datastore", move |_request| {
        counted.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {
            Err(SluiceError::UpstreamStatus {
                status: 500,
                message: "internal".to_string(),
            })
        })
    });

    let breaker = Arc::new(breaker(2, 1, Duration::from_secs(30)));
    let upstream = CircuitBreakingUpstream::new(Arc::new(inner), Arc::clone(&breaker));
    let request = InboundRequest::get("/api/products");

    for _ in 0..2 {
        let err = upstream.fetch(&request).await.unwrap_err();
        assert!(matches!(err, SluiceError::UpstreamStatus { status: 500, .. }));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let err = upstream.fetch(&request).await.unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(upstream.name(), "datastore");
}

#[tokio::test]
async fn wrapped_upstream_returns_body_when_closed() {
    let inner = from_fn("datastore", |request| {
        Box::pin(async move { Ok(Bytes::from(request.path)) })
    });
    let breaker = Arc::new(breaker(5, 2, Duration::from_secs(60)));
    let upstream = CircuitBreakingUpstream::new(Arc::new(inner), breaker);

    let body = upstream
        .fetch(&InboundRequest::get("/api/products/1"))
        .await
        .unwrap();
    assert_eq!(body, Bytes::from_static(b"/api/products/1"));
}
