//! sluice — configuration inspection CLI
//!
//! Validates a sluice config file and shows how routes resolve against its
//! cache policies.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sluice::Config;

/// Sluice CLI
#[derive(Parser)]
#[command(name = "sluice")]
#[command(version)]
#[command(about = "Inspect sluice caching and protection configuration")]
struct Args {
    /// Config file (default: ~/.sluice/config.toml, then /etc/sluice/config.toml)
    #[arg(short, long, env = "SLUICE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the config file and print a summary
    Check,

    /// Show the cache policy a request path resolves to
    Route {
        /// Request path, e.g. /api/products/42
        path: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Check => print_summary(&config),
        Command::Route { path } => {
            let table = config.policy_table();
            match table.lookup(&path) {
                Some(policy) => {
                    println!("Cache-Control: {}", policy.cache_control());
                    println!("Vary: Accept-Encoding");
                }
                None => println!("{path}: no cache policy (uncached, X-Cache: BYPASS)"),
            }
        }
    }

    Ok(())
}

fn print_summary(config: &Config) {
    println!("Config OK");
    println!();

    if config.cache.enabled {
        println!(
            "cache:       {} entries, store default TTL {}s",
            config.cache.max_entries, config.cache.default_ttl_secs
        );
    } else {
        println!("cache:       disabled");
    }

    if config.coalescing.enabled {
        println!("coalescing:  timeout {}ms", config.coalescing.timeout_ms);
    } else {
        println!("coalescing:  disabled");
    }

    if config.breaker.enabled {
        println!(
            "breaker:     '{}' opens after {} failures, closes after {} successes, cool-down {}ms",
            config.breaker.name,
            config.breaker.failure_threshold,
            config.breaker.success_threshold,
            config.breaker.timeout_ms
        );
    } else {
        println!("breaker:     disabled");
    }

    if config.rate_limit.enabled && !config.rate_limit.rules.is_empty() {
        println!("rate limits:");
        for rule in &config.rate_limit.rules {
            let prefix = rule.path_prefix.as_deref().unwrap_or("*");
            println!(
                "  {:<9} {} per {}s on {prefix}",
                rule.scope.as_str(),
                rule.max_requests,
                rule.window_secs
            );
        }
    } else {
        println!("rate limits: none");
    }

    println!("sweep:       every {}s", config.maintenance.sweep_interval_secs);

    if config.policies.is_empty() {
        println!("policies:    none");
    } else {
        println!("policies:");
        for entry in &config.policies {
            println!("  {:<28} {}", entry.path, entry.to_policy().cache_control());
        }
    }
}
