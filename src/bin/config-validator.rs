//! # Scanflow Configuration Validator
//!
//! Command-line tool for validating Scanflow configuration files before
//! starting the orchestration system.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use scanflow_core::config::{ConfigManager, ScanflowConfig};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate Scanflow configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (TOML); falls back to SCANFLOW_CONFIG, then config/scanflow.toml
    #[arg(short, long, env = "SCANFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Ignore SCANFLOW__* environment overrides
    #[arg(long)]
    file_only: bool,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate every configuration section
    All,

    /// Validate one section
    Component {
        /// orchestration, execution, resources, metrics, monitoring, optimization, logging
        name: String,
    },

    /// Print the effective configuration as JSON
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = load(&cli).and_then(|manager| match &cli.command {
        Some(Commands::All) | None => validate_all(&manager),
        Some(Commands::Component { name }) => validate_component(manager.config(), name),
        Some(Commands::Show) => show(&manager),
    });

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            println!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<Arc<ConfigManager>> {
    let manager = match (&cli.config, cli.file_only) {
        (Some(path), true) => ConfigManager::load_file_only(path),
        (Some(path), false) => ConfigManager::load_from_file(Some(path)),
        (None, _) => ConfigManager::load(),
    }
    .context("failed to load configuration")?;
    println!("✅ Configuration loaded and validated");
    println!("   Environment: {}", manager.environment());
    match manager.source() {
        Some(path) => println!("   Source: {}", path.display()),
        None => println!("   Source: built-in defaults"),
    }
    Ok(manager)
}

fn validate_all(manager: &ConfigManager) -> anyhow::Result<()> {
    let config = manager.config();
    for name in [
        "orchestration",
        "execution",
        "resources",
        "metrics",
        "monitoring",
        "optimization",
        "logging",
    ] {
        validate_component(config, name)?;
    }
    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn validate_component(config: &ScanflowConfig, name: &str) -> anyhow::Result<()> {
    match name.to_lowercase().as_str() {
        "orchestration" => {
            let o = &config.orchestration;
            println!("🎼 Orchestration");
            println!(
                "   ✅ Concurrency: default {} / limit {}",
                o.default_max_concurrent_scans, o.max_concurrent_scans_limit
            );
            println!(
                "   ✅ Defaults: timeout {}s, failure threshold {:.0}%",
                o.default_timeout_seconds,
                o.default_failure_threshold * 100.0
            );
        }
        "execution" => {
            let e = &config.execution;
            println!("🔁 Execution");
            println!(
                "   ✅ Retries: {} every {}s, backoff capped at {}s",
                e.default_max_retries, e.default_retry_delay_seconds, e.backoff_max_seconds
            );
        }
        "resources" => {
            let r = &config.resources;
            println!("🧮 Resources");
            if r.pools.is_empty() {
                bail!("no resource pools configured");
            }
            for pool in &r.pools {
                println!(
                    "   ✅ Pool {} ({}): capacity {}, cost/unit {}",
                    pool.id, pool.resource_type, pool.capacity, pool.cost_per_unit
                );
            }
            println!("   ✅ Exhaustion policy: {:?}", r.exhaustion_policy);
        }
        "metrics" => {
            let m = &config.metrics;
            println!("📊 Metrics");
            println!(
                "   ✅ Window {} samples, baseline over {}",
                m.window_capacity, m.baseline_window
            );
        }
        "monitoring" => {
            let m = &config.monitoring;
            println!("📈 Monitoring");
            println!(
                "   ✅ Tiers: {}ms / {}s / {}s / {}s",
                m.real_time_ms, m.short_term_secs, m.medium_term_secs, m.long_term_secs
            );
            println!(
                "   ✅ Thresholds: cpu {}%, memory {}%, latency {}ms",
                m.cpu_threshold, m.memory_threshold, m.latency_threshold_ms
            );
        }
        "optimization" => {
            let o = &config.optimization;
            println!("🚀 Optimization");
            println!(
                "   ✅ Auto-apply: {} (max risk {:?}, min score {})",
                o.auto_apply, o.auto_apply_max_risk, o.min_auto_apply_score
            );
            println!("   ✅ Constraint enforcement: {:?}", o.constraints.enforcement);
        }
        "logging" => {
            let l = &config.logging;
            println!("📝 Logging");
            println!(
                "   ✅ Level: {}, format: {:?}",
                l.level.as_deref().unwrap_or("per-environment default"),
                l.format
            );
        }
        other => bail!("unknown component: {other}"),
    }
    Ok(())
}

fn show(manager: &ConfigManager) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(manager.config())
        .context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}
