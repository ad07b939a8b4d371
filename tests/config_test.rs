//! Tests for configuration loading and validation.

use std::fs;
use std::time::Duration;

use sluice::cache::TtlStore;
use sluice::config::Config;
use sluice::{RateLimitScope, SluiceError, Visibility};
use tokio_test::{assert_err, assert_ok};

const FULL_CONFIG: &str = r#"
[cache]
max_entries = 5000
default_ttl_secs = 120

[coalescing]
timeout_ms = 10000

[breaker]
name = "mongo"
failure_threshold = 3
success_threshold = 1
timeout_ms = 30000

[rate_limit]
[[rate_limit.rules]]
scope = "ip"
max_requests = 100
window_secs = 60

[[rate_limit.rules]]
scope = "user"
max_requests = 1000
window_secs = 3600
path_prefix = "/api/"

[compression]
level = 9
threshold_bytes = 2048

[maintenance]
sweep_interval_secs = 30

[[policies]]
path = "/api/products"
max_age_secs = 600
stale_while_revalidate_secs = 86400

[[policies]]
path = "/api/users/:id"
max_age_secs = 30
visibility = "private"
"#;

#[test]
fn full_config_parses() {
    let config = Config::from_toml(FULL_CONFIG).unwrap();

    assert_eq!(config.cache.max_entries, 5000);
    assert_eq!(config.cache.to_config().ttl, Duration::from_secs(120));
    assert_eq!(config.coalescing.to_config().timeout, Duration::from_secs(10));

    let breaker = config.breaker.to_config();
    assert_eq!(breaker.name, "mongo");
    assert_eq!(breaker.failure_threshold, 3);
    assert_eq!(breaker.success_threshold, 1);
    assert_eq!(breaker.timeout, Duration::from_secs(30));

    let rules = config.rate_limit_rules();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].scope, RateLimitScope::Ip);
    assert_eq!(rules[1].window, Duration::from_secs(3600));
    assert_eq!(rules[1].path_prefix.as_deref(), Some("/api/"));

    assert_eq!(config.compression.level, 9);
    assert!(config.compression.should_compress(2048));
    assert!(!config.compression.should_compress(2047));

    assert_eq!(config.sweep_interval(), Duration::from_secs(30));
}

#[test]
fn policies_build_a_lookup_table() {
    let config = Config::from_toml(FULL_CONFIG).unwrap();
    let table = config.policy_table();

    assert_eq!(table.len(), 2);
    assert_eq!(
        table.lookup("/api/products").unwrap().cache_control(),
        "public, max-age=600, stale-while-revalidate=86400"
    );
    let user = table.lookup("/api/users/42").unwrap();
    assert_eq!(user.visibility, Visibility::Private);
    assert_eq!(user.cache_control(), "private, max-age=30");
}

#[test]
fn load_from_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sluice.toml");
    fs::write(&path, FULL_CONFIG).unwrap();

    let config = assert_ok!(Config::load(Some(&path)));
    assert_eq!(config.breaker.name, "mongo");
}

#[test]
fn load_reports_parse_errors_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[cache\nmax_entries = 1").unwrap();

    let err = Config::load(Some(&path)).unwrap_err();
    assert!(matches!(err, SluiceError::Configuration(_)));
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
fn missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
}

#[test]
fn unknown_scope_is_rejected() {
    let result = Config::from_toml(
        r#"
        [[rate_limit.rules]]
        scope = "planet"
        max_requests = 1
        window_secs = 1
        "#,
    );
    assert!(matches!(result, Err(SluiceError::Configuration(_))));
}

#[test]
fn zero_window_is_rejected() {
    let err = Config::from_toml(
        r#"
        [[rate_limit.rules]]
        scope = "ip"
        max_requests = 10
        window_secs = 0
        "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("window_secs"));
}

#[test]
fn relative_policy_path_is_rejected() {
    let err = Config::from_toml(
        r#"
        [[policies]]
        path = "api/products"
        max_age_secs = 60
        "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("must start with '/'"));
}

#[test]
fn compression_level_out_of_range_is_rejected() {
    assert_err!(Config::from_toml("[compression]\nlevel = 10"));
}

#[test]
fn zero_breaker_threshold_is_rejected_only_when_enabled() {
    assert_err!(Config::from_toml("[breaker]\nfailure_threshold = 0"));
    assert_ok!(Config::from_toml("[breaker]\nenabled = false\nfailure_threshold = 0"));
}

#[tokio::test(start_paused = true)]
async fn default_ttl_applies_to_plain_store_sets() {
    let config = Config::from_toml(FULL_CONFIG).unwrap();
    let store: TtlStore<u32> = TtlStore::new(&config.cache.to_config()).unwrap();
    store.set("a", 1);

    tokio::time::advance(Duration::from_secs(119)).await;
    assert_eq!(store.get("a"), Some(1));
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(store.get("a"), None);
}
