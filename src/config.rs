//! Configuration loading.
//!
//! Configuration is a static TOML file read once at startup, resolved in
//! this order:
//! 1. `--config <path>` (explicit path)
//! 2. `~/.sluice/config.toml` (user)
//! 3. `/etc/sluice/config.toml` (system)
//!
//! Every section has serde defaults, so an empty file is a valid
//! configuration with all features enabled and no cache policies.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::breaker::CircuitBreakerConfig;
use crate::cache::{CacheConfig, CachePolicy, PolicyTable, Visibility};
use crate::coalesce::{CoalescingConfig, DEFAULT_COALESCING_TIMEOUT};
use crate::maintenance::DEFAULT_SWEEP_INTERVAL;
use crate::rate_limit::{RateLimitRule, RateLimitScope};
use crate::{Result, SluiceError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub coalescing: CoalescingSection,
    #[serde(default)]
    pub breaker: BreakerSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub maintenance: MaintenanceSection,
    #[serde(default)]
    pub policies: Vec<PolicyEntry>,
}

/// `[cache]`: response store.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum entries (default: 1000).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Default TTL for [`TtlStore::set`](crate::cache::TtlStore::set) (default: 300).
    ///
    /// The pipeline stores each response for its route policy's `max-age`.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheSection {
    pub fn to_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_entries(self.max_entries)
            .ttl(Duration::from_secs(self.default_ttl_secs))
    }
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> usize {
    1_000
}

fn default_ttl_secs() -> u64 {
    300
}

/// `[coalescing]`: in-flight request deduplication.
#[derive(Debug, Clone, Deserialize)]
pub struct CoalescingSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Deadline for an in-flight call in milliseconds (default: 30000).
    #[serde(default = "default_coalescing_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for CoalescingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_coalescing_timeout_ms(),
        }
    }
}

impl CoalescingSection {
    pub fn to_config(&self) -> CoalescingConfig {
        CoalescingConfig::new().timeout(Duration::from_millis(self.timeout_ms))
    }
}

fn default_coalescing_timeout_ms() -> u64 {
    DEFAULT_COALESCING_TIMEOUT.as_millis() as u64
}

/// `[breaker]`: circuit breaker around the upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_breaker_name")]
    pub name: String,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Open-state cool-down in milliseconds (default: 60000).
    #[serde(default = "default_breaker_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            name: default_breaker_name(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_breaker_timeout_ms(),
        }
    }
}

impl BreakerSection {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(self.name.clone())
            .failure_threshold(self.failure_threshold)
            .success_threshold(self.success_threshold)
            .timeout(Duration::from_millis(self.timeout_ms))
    }
}

fn default_breaker_name() -> String {
    "datastore".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_breaker_timeout_ms() -> u64 {
    60_000
}

/// `[rate_limit]`: fixed-window quotas.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<RateLimitEntry>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
        }
    }
}

/// One `[[rate_limit.rules]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitEntry {
    pub scope: RateLimitScope,
    pub max_requests: u32,
    pub window_secs: u64,
    #[serde(default)]
    pub path_prefix: Option<String>,
}

impl RateLimitEntry {
    pub fn to_rule(&self) -> RateLimitRule {
        let rule = RateLimitRule::new(
            self.scope,
            self.max_requests,
            Duration::from_secs(self.window_secs),
        );
        match &self.path_prefix {
            Some(prefix) => rule.path_prefix(prefix.clone()),
            None => rule,
        }
    }
}

/// `[compression]`: parameters handed to the routing layer's encoder.
///
/// Sluice does not compress bodies itself; it flags responses worth
/// compressing and always emits `Vary: Accept-Encoding` on cacheable reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Encoder level, 0-9 (default: 6).
    #[serde(default = "default_compression_level")]
    pub level: u32,
    /// Minimum body size worth compressing (default: 1024).
    #[serde(default = "default_compression_threshold")]
    pub threshold_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_compression_level(),
            threshold_bytes: default_compression_threshold(),
        }
    }
}

impl CompressionConfig {
    pub fn should_compress(&self, body_len: usize) -> bool {
        self.enabled && body_len >= self.threshold_bytes
    }
}

fn default_compression_level() -> u32 {
    6
}

fn default_compression_threshold() -> usize {
    1024
}

/// `[maintenance]`: background sweep.
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceSection {
    /// Seconds between sweeps (default: 60).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

/// One `[[policies]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyEntry {
    /// Exact path or pattern (`/api/products/:id`).
    pub path: String,
    pub max_age_secs: u64,
    #[serde(default)]
    pub stale_while_revalidate_secs: Option<u64>,
    #[serde(default)]
    pub stale_if_error_secs: Option<u64>,
    #[serde(default)]
    pub visibility: Visibility,
}

impl PolicyEntry {
    pub fn to_policy(&self) -> CachePolicy {
        CachePolicy {
            max_age: Duration::from_secs(self.max_age_secs),
            stale_while_revalidate: self.stale_while_revalidate_secs.map(Duration::from_secs),
            stale_if_error: self.stale_if_error_secs.map(Duration::from_secs),
            visibility: self.visibility,
        }
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.sluice/config.toml`
    /// 3. `/etc/sluice/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            SluiceError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::from_toml(&content).map_err(|e| {
            SluiceError::Configuration(format!("Invalid config file {path:?}: {e}"))
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(SluiceError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".sluice").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/sluice/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(SluiceError::Configuration(
            "No config file found. Create ~/.sluice/config.toml or /etc/sluice/config.toml"
                .to_string(),
        ))
    }

    /// Reject values that would make a component unusable.
    pub fn validate(&self) -> Result<()> {
        if self.cache.enabled && self.cache.max_entries == 0 {
            return invalid("cache.max_entries must be greater than zero".into());
        }
        if self.coalescing.enabled && self.coalescing.timeout_ms == 0 {
            return invalid("coalescing.timeout_ms must be greater than zero".into());
        }
        if self.breaker.enabled
            && (self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0)
        {
            return invalid("breaker thresholds must be greater than zero".into());
        }
        if self.maintenance.sweep_interval_secs == 0 {
            return invalid("maintenance.sweep_interval_secs must be greater than zero".into());
        }
        if self.compression.level > 9 {
            return invalid(format!(
                "compression.level must be 0-9, got {}",
                self.compression.level
            ));
        }
        for (i, rule) in self.rate_limit.rules.iter().enumerate() {
            if rule.window_secs == 0 {
                return invalid(format!("rate_limit.rules[{i}].window_secs must be greater than zero"));
            }
        }
        for policy in &self.policies {
            if !policy.path.starts_with('/') {
                return invalid(format!("policy path must start with '/': {}", policy.path));
            }
        }
        Ok(())
    }

    /// Route policies in file order.
    pub fn policy_table(&self) -> PolicyTable {
        self.policies
            .iter()
            .fold(PolicyTable::new(), |table, entry| {
                table.with(&entry.path, entry.to_policy())
            })
    }

    pub fn rate_limit_rules(&self) -> Vec<RateLimitRule> {
        self.rate_limit.rules.iter().map(RateLimitEntry::to_rule).collect()
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance.sweep_interval_secs)
    }
}

fn invalid(msg: String) -> Result<()> {
    Err(SluiceError::Configuration(msg))
}
