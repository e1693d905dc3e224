//! # Orchestration Bootstrap
//!
//! Wires the job controller, performance monitor and optimization recommender
//! around one [`ServiceContext`] and runs their control loops:
//!
//! - the controller's directive loop, serving [`ControllerHandle`] requests
//! - the monitor's tiered sampling and detection loop
//! - the recommender's detection consumer, execution loop and predictive loop
//!
//! Every loop watches the same [`CancellationToken`], so
//! [`OrchestrationSystem::shutdown`] stops them together.

use super::context::ServiceContext;
use super::directives::{directive_channel, ControllerHandle};
use super::job_controller::JobController;
use crate::config::ConfigManager;
use crate::error::Result;
use crate::logging::init_structured_logging;
use crate::monitoring::PerformanceMonitor;
use crate::optimization::OptimizationRecommender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Buffered detections between the monitor and the recommender
const DETECTION_CHANNEL_CAPACITY: usize = 256;

/// Bootstrap options
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Configuration file; `None` uses `SCANFLOW_CONFIG` or the default location
    pub config_path: Option<PathBuf>,
    /// Start the monitoring and optimization loops (the directive loop always runs)
    pub start_background_loops: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            start_background_loops: true,
        }
    }
}

/// Point-in-time view of a running system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub running: bool,
    pub environment: String,
    pub active_jobs: usize,
    pub overall_utilization: f64,
    pub total_samples: u64,
    pub pending_optimizations: usize,
}

/// Running orchestration system
pub struct OrchestrationSystem {
    ctx: ServiceContext,
    environment: String,
    controller: JobController,
    monitor: Arc<PerformanceMonitor>,
    recommender: Arc<OptimizationRecommender>,
    handle: ControllerHandle,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for OrchestrationSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationSystem")
            .field("environment", &self.environment)
            .field("controller", &self.controller)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl OrchestrationSystem {
    /// Start every component over `ctx`; must be called inside a Tokio runtime
    pub fn start(ctx: ServiceContext, environment: impl Into<String>, background_loops: bool) -> Self {
        let shutdown = CancellationToken::new();
        let (handle, directives) =
            directive_channel(ctx.config.orchestration.directive_channel_capacity);
        let (detection_tx, detection_rx) = mpsc::channel(DETECTION_CHANNEL_CAPACITY);

        let controller = JobController::new(ctx.clone());
        let monitor = Arc::new(PerformanceMonitor::new(ctx.clone()).with_detection_sink(detection_tx));
        let recommender = Arc::new(
            OptimizationRecommender::new(ctx.clone(), Arc::new(handle.clone()))
                .with_shutdown(shutdown.clone()),
        );

        let mut tasks = Vec::new();
        {
            let controller = controller.clone();
            let token = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                controller.run_directive_loop(directives, token).await;
            }));
        }
        if background_loops {
            tasks.push(tokio::spawn(Arc::clone(&monitor).run(shutdown.clone())));
            tasks.push(tokio::spawn(
                Arc::clone(&recommender).run_detection_consumer(detection_rx, shutdown.clone()),
            ));
            tasks.push(tokio::spawn(
                Arc::clone(&recommender).run_execution_loop(shutdown.clone()),
            ));
            tasks.push(tokio::spawn(
                Arc::clone(&recommender).run_predictive_loop(shutdown.clone()),
            ));
        }

        let environment = environment.into();
        info!(
            environment = %environment,
            background_loops,
            pools = ctx.allocator.pool_ids().len(),
            "🚀 Orchestration system started"
        );

        Self {
            ctx,
            environment,
            controller,
            monitor,
            recommender,
            handle,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn recommender(&self) -> &Arc<OptimizationRecommender> {
        &self.recommender
    }

    /// Directive sender for out-of-band tuning
    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            running: self.is_running(),
            environment: self.environment.clone(),
            active_jobs: self.controller.active_job_ids().len(),
            overall_utilization: self.ctx.allocator.overall_utilization(),
            total_samples: self.ctx.metrics.total_samples(),
            pending_optimizations: self.recommender.pending_count(),
        }
    }

    /// Cancel active jobs, stop every loop and wait for them to exit
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            warn!("Orchestration system already stopped");
            return;
        }
        info!("🛑 Orchestration system shutdown requested");
        self.controller.shutdown().await;
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Control loop ended abnormally");
            }
        }
        info!("✅ Orchestration system stopped");
    }
}

/// Entry points for bringing the system up
pub struct OrchestrationBootstrap;

impl OrchestrationBootstrap {
    /// Load configuration, build a default in-memory context and start
    pub async fn bootstrap(config: BootstrapConfig) -> Result<OrchestrationSystem> {
        info!("🚀 BOOTSTRAP: Loading configuration");
        let manager = match &config.config_path {
            Some(path) => ConfigManager::load_from_file(Some(path))?,
            None => ConfigManager::load()?,
        };
        init_structured_logging(&manager.config().logging);
        info!(
            environment = manager.environment(),
            source = ?manager.source(),
            "✅ BOOTSTRAP: Configuration loaded"
        );
        let ctx = ServiceContext::builder(manager.config().clone()).build();
        Ok(OrchestrationSystem::start(
            ctx,
            manager.environment(),
            config.start_background_loops,
        ))
    }

    /// Start over a caller-assembled context (custom handlers, repository, notifier)
    pub async fn bootstrap_with_context(ctx: ServiceContext) -> Result<OrchestrationSystem> {
        ConfigManager::from_config(ctx.config.as_ref().clone())?;
        init_structured_logging(&ctx.config.logging);
        let environment = ConfigManager::detect_environment();
        Ok(OrchestrationSystem::start(ctx, environment, true))
    }

    /// Default configuration, directive loop only; loops are driven by hand in tests
    pub async fn bootstrap_testing(ctx: ServiceContext) -> Result<OrchestrationSystem> {
        ConfigManager::from_config(ctx.config.as_ref().clone())?;
        Ok(OrchestrationSystem::start(ctx, "test", false))
    }
}
