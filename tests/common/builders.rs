//! Shared fixtures: fast-ticking configuration and service contexts.

use scanflow_core::config::ScanflowConfig;
use scanflow_core::models::{ResourcePoolConfig, ResourceType, StepSpec, StepType};
use scanflow_core::orchestration::{JobController, ServiceContext};
use scanflow_core::registry::HandlerRegistry;
use scanflow_core::services::InMemoryNotificationDispatcher;
use scanflow_core::state_machine::JobState;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Defaults with millisecond scheduling and no retry delay
pub fn fast_config() -> ScanflowConfig {
    let mut config = ScanflowConfig::default();
    config.orchestration.scheduler_tick_ms = 5;
    config.execution.default_retry_delay_seconds = 0;
    config.resources.queue_timeout_ms = 200;
    config.resources.allocation_backoff_ms = 1;
    config.optimization.observation_window_secs = 0;
    config
}

/// Single small CPU pool, for capacity scenarios
pub fn small_pool_config(capacity: f64) -> ScanflowConfig {
    let mut config = fast_config();
    config.resources.pools = vec![ResourcePoolConfig::new("cpu", ResourceType::Cpu, capacity)];
    config.resources.allocation_attempts = 1;
    config
}

pub struct TestHarness {
    pub ctx: ServiceContext,
    pub controller: JobController,
    pub notifier: Arc<InMemoryNotificationDispatcher>,
}

pub fn harness(config: ScanflowConfig, registry: HandlerRegistry) -> TestHarness {
    let notifier = Arc::new(InMemoryNotificationDispatcher::new());
    let ctx = ServiceContext::builder(config)
        .handlers(Arc::new(registry))
        .notifier(notifier.clone())
        .build();
    TestHarness {
        controller: JobController::new(ctx.clone()),
        ctx,
        notifier,
    }
}

/// `step_1 → step_2 → … → step_n`
pub fn sequential_steps(n: usize) -> Vec<StepSpec> {
    (1..=n)
        .map(|i| {
            let spec = StepSpec::new(format!("step_{i}"), StepType::Scan).with_order(i as u32);
            if i == 1 {
                spec
            } else {
                spec.depends_on([format!("step_{}", i - 1)])
            }
        })
        .collect()
}

pub fn wait_timeout() -> Option<Duration> {
    Some(Duration::from_secs(10))
}

/// Poll until the job reaches `state`
pub async fn wait_for_state(controller: &JobController, job_id: Uuid, state: JobState) -> bool {
    for _ in 0..1000 {
        match controller.get_job_status(job_id) {
            Ok(job) if job.status == state => return true,
            Ok(job) if job.status.is_terminal() => return false,
            _ => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    false
}
