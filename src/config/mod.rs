//! # Scanflow Configuration
//!
//! Typed configuration for the orchestration core. Values are layered from
//! built-in defaults, an optional TOML file, and `SCANFLOW__*` environment
//! variables (see [`ConfigManager`]).
//!
//! ```rust,no_run
//! use scanflow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let limit = manager.config().orchestration.max_concurrent_scans_limit;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::models::{
    OptimizationConstraints, ResourcePoolConfig, ResourceType, RiskLevel,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScanflowConfig {
    pub orchestration: OrchestrationConfig,
    pub execution: ExecutionConfig,
    pub resources: ResourcesConfig,
    pub metrics: MetricsConfig,
    pub monitoring: MonitoringConfig,
    pub optimization: OptimizationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Ceiling for any job's `max_concurrent_scans`
    pub max_concurrent_scans_limit: usize,
    pub default_max_concurrent_scans: usize,
    pub default_timeout_seconds: u64,
    pub default_failure_threshold: f64,
    /// Dispatch cadence of each job driver
    pub scheduler_tick_ms: u64,
    pub directive_channel_capacity: usize,
    pub event_channel_capacity: usize,
    /// Utilization above which `adaptive` switches to `resource_aware`
    pub adaptive_high_load: f64,
    /// Success rate below which `adaptive` falls back to `sequential`
    pub adaptive_low_success_rate: f64,
    /// Finished jobs kept in memory for status queries
    pub finished_job_retention: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans_limit: 100,
            default_max_concurrent_scans: 10,
            default_timeout_seconds: 3600,
            default_failure_threshold: 0.25,
            scheduler_tick_ms: 50,
            directive_channel_capacity: 64,
            event_channel_capacity: 1000,
            adaptive_high_load: 0.8,
            adaptive_low_success_rate: 0.8,
            finished_job_retention: 1000,
        }
    }
}

impl OrchestrationConfig {
    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub default_max_retries: u32,
    pub default_retry_delay_seconds: u64,
    pub backoff_max_seconds: u64,
    /// Applied to steps that declare no timeout
    pub step_timeout_seconds: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            default_retry_delay_seconds: 5,
            backoff_max_seconds: 300,
            step_timeout_seconds: 900,
        }
    }
}

impl ExecutionConfig {
    /// `retry_delay × 2^(retry_count − 1)`, capped at `backoff_max_seconds`
    pub fn backoff_for(&self, retry_delay_seconds: u64, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(32);
        let factor = 1u64 << exponent;
        let seconds = retry_delay_seconds
            .saturating_mul(factor)
            .min(self.backoff_max_seconds);
        Duration::from_secs(seconds)
    }
}

/// What the allocator does when a pool cannot satisfy a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    #[default]
    Fail,
    Queue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub pools: Vec<ResourcePoolConfig>,
    /// Attempts made by `allocate_with_retry` before surfacing exhaustion
    pub allocation_attempts: u32,
    pub allocation_backoff_ms: u64,
    pub queue_timeout_ms: u64,
    pub exhaustion_policy: ExhaustionPolicy,
    /// Released allocations kept per pool for efficiency reporting
    pub released_history_limit: usize,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            pools: vec![
                ResourcePoolConfig::new("cpu", ResourceType::Cpu, 64.0).with_cost_per_unit(0.05),
                ResourcePoolConfig::new("memory", ResourceType::Memory, 256.0)
                    .with_cost_per_unit(0.01),
                ResourcePoolConfig::new("storage", ResourceType::Storage, 2048.0)
                    .with_cost_per_unit(0.001),
                ResourcePoolConfig::new("network", ResourceType::Network, 100.0)
                    .with_cost_per_unit(0.02),
                ResourcePoolConfig::new("db_connections", ResourceType::DbConnections, 50.0),
            ],
            allocation_attempts: 3,
            allocation_backoff_ms: 100,
            queue_timeout_ms: 30_000,
            exhaustion_policy: ExhaustionPolicy::Fail,
            released_history_limit: 1000,
        }
    }
}

impl ResourcesConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn allocation_backoff(&self) -> Duration {
        Duration::from_millis(self.allocation_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples retained per (component, metric type)
    pub window_capacity: usize,
    /// Most recent samples the baseline median is computed over
    pub baseline_window: usize,
    /// Step outcomes retained per component for success rates
    pub outcome_window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_capacity: 1000,
            baseline_window: 100,
            outcome_window: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub real_time_ms: u64,
    pub short_term_secs: u64,
    pub medium_term_secs: u64,
    pub long_term_secs: u64,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub network_threshold: f64,
    pub database_threshold: f64,
    pub latency_threshold_ms: f64,
    pub latency_severity_ceiling_ms: f64,
    pub execution_time_degradation_ratio: f64,
    /// Trailing samples that must all breach a utilization threshold
    pub min_consecutive_samples: usize,
    pub reliability_success_rate: f64,
    pub reliability_factor: f64,
    pub detection_cooldown_secs: u64,
    pub alert_severity_threshold: f64,
    pub baseline_refresh_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            real_time_ms: 1000,
            short_term_secs: 60,
            medium_term_secs: 300,
            long_term_secs: 3600,
            cpu_threshold: 80.0,
            memory_threshold: 80.0,
            network_threshold: 80.0,
            database_threshold: 80.0,
            latency_threshold_ms: 1000.0,
            latency_severity_ceiling_ms: 5000.0,
            execution_time_degradation_ratio: 1.5,
            min_consecutive_samples: 3,
            reliability_success_rate: 0.95,
            reliability_factor: 1.2,
            detection_cooldown_secs: 300,
            alert_severity_threshold: 0.9,
            baseline_refresh_secs: 300,
        }
    }
}

impl MonitoringConfig {
    pub fn real_time_interval(&self) -> Duration {
        Duration::from_millis(self.real_time_ms)
    }

    pub fn short_term_interval(&self) -> Duration {
        Duration::from_secs(self.short_term_secs)
    }

    pub fn medium_term_interval(&self) -> Duration {
        Duration::from_secs(self.medium_term_secs)
    }

    pub fn long_term_interval(&self) -> Duration {
        Duration::from_secs(self.long_term_secs)
    }

    pub fn baseline_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.baseline_refresh_secs)
    }

    pub fn detection_cooldown(&self) -> Duration {
        Duration::from_secs(self.detection_cooldown_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub auto_apply: bool,
    pub auto_apply_max_risk: RiskLevel,
    pub min_auto_apply_score: f64,
    pub max_recommendations_per_bottleneck: usize,
    /// Samples in each of the earlier/recent windows compared by the predictor
    pub predictive_window: usize,
    pub predictive_risk_threshold: f64,
    pub predictive_interval_secs: u64,
    pub execution_poll_interval_ms: u64,
    /// Wait between applying a change and taking the "after" snapshot
    pub observation_window_secs: u64,
    /// Finished recommendations kept in memory for status queries
    pub result_retention: usize,
    pub constraints: OptimizationConstraints,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            auto_apply: true,
            auto_apply_max_risk: RiskLevel::Low,
            min_auto_apply_score: 0.05,
            max_recommendations_per_bottleneck: 3,
            predictive_window: 5,
            predictive_risk_threshold: 0.2,
            predictive_interval_secs: 60,
            execution_poll_interval_ms: 1000,
            observation_window_secs: 60,
            result_retention: 500,
            constraints: OptimizationConstraints::default(),
        }
    }
}

impl OptimizationConfig {
    pub fn execution_poll_interval(&self) -> Duration {
        Duration::from_millis(self.execution_poll_interval_ms)
    }

    pub fn predictive_interval(&self) -> Duration {
        Duration::from_secs(self.predictive_interval_secs)
    }

    pub fn observation_window(&self) -> Duration {
        Duration::from_secs(self.observation_window_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Overrides the per-environment default level; `RUST_LOG` wins over both
    pub level: Option<String>,
    pub format: LogFormat,
}

impl ScanflowConfig {
    /// Rejects values the orchestration core cannot operate with
    pub fn validate(&self) -> ConfigResult<()> {
        let orchestration = &self.orchestration;
        if orchestration.max_concurrent_scans_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestration.max_concurrent_scans_limit",
                0,
                "limit must be greater than 0",
            ));
        }
        if orchestration.default_max_concurrent_scans == 0
            || orchestration.default_max_concurrent_scans > orchestration.max_concurrent_scans_limit
        {
            return Err(ConfigurationError::invalid_value(
                "orchestration.default_max_concurrent_scans",
                orchestration.default_max_concurrent_scans,
                "must be within [1, max_concurrent_scans_limit]",
            ));
        }
        check_fraction(
            "orchestration.default_failure_threshold",
            orchestration.default_failure_threshold,
        )?;
        check_fraction("orchestration.adaptive_high_load", orchestration.adaptive_high_load)?;
        check_fraction(
            "orchestration.adaptive_low_success_rate",
            orchestration.adaptive_low_success_rate,
        )?;
        check_positive("orchestration.scheduler_tick_ms", orchestration.scheduler_tick_ms)?;
        check_positive(
            "orchestration.directive_channel_capacity",
            orchestration.directive_channel_capacity as u64,
        )?;
        check_positive(
            "orchestration.event_channel_capacity",
            orchestration.event_channel_capacity as u64,
        )?;
        check_positive(
            "orchestration.default_timeout_seconds",
            orchestration.default_timeout_seconds,
        )?;
        check_positive(
            "orchestration.finished_job_retention",
            orchestration.finished_job_retention as u64,
        )?;

        if self.execution.backoff_max_seconds < self.execution.default_retry_delay_seconds {
            return Err(ConfigurationError::invalid_value(
                "execution.backoff_max_seconds",
                self.execution.backoff_max_seconds,
                "must not be below default_retry_delay_seconds",
            ));
        }
        check_positive("execution.step_timeout_seconds", self.execution.step_timeout_seconds)?;

        let mut pool_ids = HashSet::new();
        for pool in &self.resources.pools {
            if pool.id.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "resources.pools[].id",
                    "resource pool configuration",
                ));
            }
            if !pool_ids.insert(pool.id.as_str()) {
                return Err(ConfigurationError::invalid_value(
                    "resources.pools[].id",
                    &pool.id,
                    "pool ids must be unique",
                ));
            }
            if !(pool.capacity > 0.0 && pool.capacity.is_finite()) {
                return Err(ConfigurationError::invalid_value(
                    format!("resources.pools.{}.capacity", pool.id),
                    pool.capacity,
                    "capacity must be a positive number",
                ));
            }
            if pool.cost_per_unit < 0.0 {
                return Err(ConfigurationError::invalid_value(
                    format!("resources.pools.{}.cost_per_unit", pool.id),
                    pool.cost_per_unit,
                    "cost must not be negative",
                ));
            }
        }
        check_positive(
            "resources.allocation_attempts",
            u64::from(self.resources.allocation_attempts),
        )?;
        check_positive(
            "resources.released_history_limit",
            self.resources.released_history_limit as u64,
        )?;

        check_positive("metrics.window_capacity", self.metrics.window_capacity as u64)?;
        if self.metrics.baseline_window == 0
            || self.metrics.baseline_window > self.metrics.window_capacity
        {
            return Err(ConfigurationError::invalid_value(
                "metrics.baseline_window",
                self.metrics.baseline_window,
                "must be within [1, window_capacity]",
            ));
        }
        check_positive("metrics.outcome_window", self.metrics.outcome_window as u64)?;

        let monitoring = &self.monitoring;
        check_positive("monitoring.real_time_ms", monitoring.real_time_ms)?;
        check_positive("monitoring.min_consecutive_samples", monitoring.min_consecutive_samples as u64)?;
        if monitoring.execution_time_degradation_ratio <= 1.0 {
            return Err(ConfigurationError::invalid_value(
                "monitoring.execution_time_degradation_ratio",
                monitoring.execution_time_degradation_ratio,
                "ratio must be greater than 1.0",
            ));
        }
        if monitoring.latency_severity_ceiling_ms <= 0.0 {
            return Err(ConfigurationError::invalid_value(
                "monitoring.latency_severity_ceiling_ms",
                monitoring.latency_severity_ceiling_ms,
                "ceiling must be positive",
            ));
        }
        check_fraction("monitoring.reliability_success_rate", monitoring.reliability_success_rate)?;
        check_fraction("monitoring.alert_severity_threshold", monitoring.alert_severity_threshold)?;
        if monitoring.reliability_factor < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "monitoring.reliability_factor",
                monitoring.reliability_factor,
                "factor must be at least 1.0",
            ));
        }

        let optimization = &self.optimization;
        check_positive(
            "optimization.max_recommendations_per_bottleneck",
            optimization.max_recommendations_per_bottleneck as u64,
        )?;
        check_positive("optimization.predictive_window", optimization.predictive_window as u64)?;
        check_positive(
            "optimization.execution_poll_interval_ms",
            optimization.execution_poll_interval_ms,
        )?;
        check_positive("optimization.result_retention", optimization.result_retention as u64)?;
        check_fraction(
            "optimization.predictive_risk_threshold",
            optimization.predictive_risk_threshold,
        )?;

        Ok(())
    }
}

fn check_fraction(field: &str, value: f64) -> ConfigResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigurationError::invalid_value(
            field,
            value,
            "must be within [0, 1]",
        ))
    }
}

fn check_positive(field: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        Err(ConfigurationError::invalid_value(
            field,
            0,
            "must be greater than 0",
        ))
    } else {
        Ok(())
    }
}
