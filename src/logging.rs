//! # Structured Logging Module
//!
//! Environment-aware structured logging for the orchestration core. Console
//! output is either human readable or JSON lines; `RUST_LOG` overrides the
//! configured level.

use crate::config::{ConfigManager, LogFormat, LoggingConfig};
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let level = config
            .level
            .clone()
            .unwrap_or_else(|| default_log_level(&environment).to_string());

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

        let layer = match config.format {
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed(),
        };

        // Another subscriber (test harness, embedding host) may already be installed
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            level = %level,
            format = ?config.format,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Default level for an environment name
pub fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for job operations
pub fn log_job_operation(
    operation: &str,
    job_id: Option<Uuid>,
    job_name: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = job_id.map(|id| id.to_string()),
        job_name = job_name,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 JOB_OPERATION"
    );
}

/// Log structured data for step operations
pub fn log_step_operation(
    operation: &str,
    job_id: Option<Uuid>,
    step_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = job_id.map(|id| id.to_string()),
        step_id = step_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 STEP_OPERATION"
    );
}

/// Log structured data for allocator operations
pub fn log_allocation_operation(
    operation: &str,
    pool_id: &str,
    allocation_id: Option<Uuid>,
    amount: Option<f64>,
    status: &str,
) {
    tracing::debug!(
        operation = %operation,
        pool_id = %pool_id,
        allocation_id = allocation_id.map(|id| id.to_string()),
        amount = amount,
        status = %status,
        "📦 ALLOCATION_OPERATION"
    );
}

/// Log structured data for optimizer operations
pub fn log_optimization_operation(
    operation: &str,
    recommendation_id: Option<Uuid>,
    component: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        recommendation_id = recommendation_id.map(|id| id.to_string()),
        component = component,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🚀 OPTIMIZATION_OPERATION"
    );
}

/// Log errors with structured context
pub fn log_error(
    component: &str,
    operation: &str,
    error: &str,
    context: Option<&str>,
) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
