//! Tests for the fixed-window [`RateLimiter`].

use std::time::Duration;

use sluice::rate_limit::{RateLimitRule, RateLimitScope, RateLimiter};

const MINUTE: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn allows_up_to_max_then_denies() {
    let limiter = RateLimiter::new();

    for i in 0..100u32 {
        let decision = limiter.check("ip:203.0.113.7", 100, MINUTE);
        assert!(decision.allowed, "request {i} should be allowed");
        assert_eq!(decision.remaining, 99 - i);
        assert_eq!(decision.limit, 100);
    }

    let denied = limiter.check("ip:203.0.113.7", 100, MINUTE);
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert!(denied.reset_in_secs >= 1 && denied.reset_in_secs <= 60);
    assert_eq!(denied.retry_after(), Duration::from_secs(denied.reset_in_secs));
}

#[tokio::test(start_paused = true)]
async fn denied_requests_are_not_counted() {
    let limiter = RateLimiter::new();
    for _ in 0..5 {
        limiter.check("k", 2, MINUTE);
    }
    assert_eq!(limiter.window("k").unwrap().count, 2);
}

#[tokio::test(start_paused = true)]
async fn release_returns_a_slot_in_the_current_window() {
    let limiter = RateLimiter::new();
    let rule = RateLimitRule::new(RateLimitScope::Ip, 2, MINUTE);
    limiter.check_rule(&rule, "10.0.0.1");
    limiter.check_rule(&rule, "10.0.0.1");
    assert!(!limiter.check_rule(&rule, "10.0.0.1").allowed);

    limiter.release_rule(&rule, "10.0.0.1");
    assert_eq!(limiter.window("ip:10.0.0.1").unwrap().count, 1);
    assert!(limiter.check_rule(&rule, "10.0.0.1").allowed);

    // Unknown keys and rolled-over windows are left alone.
    limiter.release("ip:10.9.9.9");
    assert!(limiter.window("ip:10.9.9.9").is_none());
    tokio::time::advance(MINUTE).await;
    limiter.release_rule(&rule, "10.0.0.1");
    assert_eq!(limiter.window("ip:10.0.0.1").unwrap().count, 2);
}

#[tokio::test(start_paused = true)]
async fn reset_time_counts_down() {
    let limiter = RateLimiter::new();
    assert_eq!(limiter.check("k", 10, MINUTE).reset_in_secs, 60);

    tokio::time::advance(Duration::from_millis(20_500)).await;
    // 39.5s left, rounded up.
    assert_eq!(limiter.check("k", 10, MINUTE).reset_in_secs, 40);
}

#[tokio::test(start_paused = true)]
async fn new_window_restarts_count() {
    let limiter = RateLimiter::new();
    for _ in 0..3 {
        assert!(limiter.check("k", 3, MINUTE).allowed);
    }
    assert!(!limiter.check("k", 3, MINUTE).allowed);

    tokio::time::advance(MINUTE).await;

    let decision = limiter.check("k", 3, MINUTE);
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 2);
    assert_eq!(decision.reset_in_secs, 60);
}

#[tokio::test(start_paused = true)]
async fn idle_windows_advance_in_whole_periods() {
    let limiter = RateLimiter::new();
    limiter.check("k", 3, Duration::from_secs(10));

    // 35s later: the current window started at 30s and ends at 40s.
    tokio::time::advance(Duration::from_secs(35)).await;
    let decision = limiter.check("k", 3, Duration::from_secs(10));
    assert!(decision.allowed);
    assert_eq!(decision.reset_in_secs, 5);
}

#[tokio::test(start_paused = true)]
async fn identities_have_independent_counters() {
    let limiter = RateLimiter::new();
    assert!(limiter.check("ip:1", 1, MINUTE).allowed);
    assert!(!limiter.check("ip:1", 1, MINUTE).allowed);
    assert!(limiter.check("ip:2", 1, MINUTE).allowed);
}

#[tokio::test(start_paused = true)]
async fn scopes_do_not_share_counters() {
    let limiter = RateLimiter::new();
    let by_ip = RateLimitRule::new(RateLimitScope::Ip, 1, MINUTE);
    let by_user = RateLimitRule::new(RateLimitScope::User, 1, MINUTE);

    assert!(limiter.check_rule(&by_ip, "42").allowed);
    assert!(limiter.check_rule(&by_user, "42").allowed);
    assert!(!limiter.check_rule(&by_ip, "42").allowed);

    assert!(limiter.window("ip:42").is_some());
    assert!(limiter.window("user:42").is_some());
}

#[tokio::test(start_paused = true)]
async fn purge_keeps_active_windows() {
    let limiter = RateLimiter::new();
    limiter.check("short", 10, Duration::from_secs(1));
    limiter.check("long", 10, MINUTE);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(limiter.purge_expired(), 1);
    assert_eq!(limiter.len(), 1);
    assert!(limiter.window("long").is_some());
    assert!(limiter.window("short").is_none());
}

#[tokio::test(start_paused = true)]
async fn zero_max_denies_everything() {
    let limiter = RateLimiter::new();
    let decision = limiter.check("k", 0, MINUTE);
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
}

#[test]
fn scope_display_and_keys() {
    assert_eq!(RateLimitScope::Endpoint.to_string(), "endpoint");
    assert_eq!(RateLimitScope::User.key("alice"), "user:alice");
}
