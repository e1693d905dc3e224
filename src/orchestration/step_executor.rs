//! # Workflow Step Executor
//!
//! Runs a single attempt of one workflow step: reserves the step's resources,
//! resolves its target, invokes the registered handler under the step timeout,
//! reports resource usage and quality to the metrics store, and always releases
//! what it reserved, including when the handler panics. State transitions stay with the job controller; the
//! executor only reports an [`AttemptOutcome`].

use super::context::ServiceContext;
use crate::error::{ScanflowError, StepExecutionError};
use crate::logging::{log_error, log_step_operation};
use crate::models::{
    MetricType, PerformanceMetric, ResourceAllocation, ResourceType, ResourceUsageSample,
    StepType, WorkflowStep,
};
use crate::registry::{StepContext, StepOutput};
use crate::resources::AllocationRequest;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Outcome of one step attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Completed(StepOutput),
    Failed(StepExecutionError),
    /// The job was cancelled, paused out or timed out while the attempt ran
    Cancelled,
}

/// Inputs for one attempt beyond the step record itself
#[derive(Debug, Clone)]
pub struct AttemptInput {
    pub attempt: u32,
    pub job_priority: i32,
    pub job_context: Value,
    pub dependency_results: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct StepExecutor {
    ctx: ServiceContext,
}

impl StepExecutor {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(job_id = %step.job_id, step_id = %step.id, attempt = input.attempt))]
    pub async fn execute(
        &self,
        step: WorkflowStep,
        input: AttemptInput,
        cancel: CancellationToken,
    ) -> AttemptOutcome {
        let mut allocations = Vec::with_capacity(step.resources.len());

        // A panicking handler still has its reservations released below
        let attempt = AssertUnwindSafe(self.run_attempt(&step, &input, &mut allocations)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => AttemptOutcome::Cancelled,
            outcome = attempt => outcome.unwrap_or_else(|_| {
                AttemptOutcome::Failed(StepExecutionError::permanent("step handler panicked"))
            }),
        };

        self.release_all(&step, &allocations).await;

        match &outcome {
            AttemptOutcome::Completed(_) => {
                self.ctx.metrics.record_outcome(&step.component(), true);
                log_step_operation("execute", Some(step.job_id), Some(&step.id), "completed", None);
            }
            AttemptOutcome::Failed(err) => {
                self.ctx.metrics.record_outcome(&step.component(), false);
                log_step_operation(
                    "execute",
                    Some(step.job_id),
                    Some(&step.id),
                    "failed",
                    Some(&err.to_string()),
                );
            }
            AttemptOutcome::Cancelled => {
                debug!("Step attempt cancelled");
            }
        }
        outcome
    }

    async fn run_attempt(
        &self,
        step: &WorkflowStep,
        input: &AttemptInput,
        allocations: &mut Vec<ResourceAllocation>,
    ) -> AttemptOutcome {
        let component = step.component();

        let wait_started = Instant::now();
        if let Err(err) = self.reserve(step, input.job_priority, allocations).await {
            let failure = match err {
                ScanflowError::ResourceExhaustion { .. } => StepExecutionError::transient(err.to_string()),
                other => StepExecutionError::permanent(other.to_string()),
            };
            return AttemptOutcome::Failed(failure);
        }
        self.record(step, &component, MetricType::QueueWaitTime, millis(wait_started.elapsed()));

        let connection = match &step.target {
            Some(target) => match self.ctx.resolver.resolve(target).await {
                Ok(descriptor) => Some(descriptor),
                Err(err) => {
                    return AttemptOutcome::Failed(StepExecutionError::permanent(format!(
                        "target resolution failed: {err}"
                    )))
                }
            },
            None => None,
        };

        let Some(handler) = self.ctx.handlers.resolve(step) else {
            return AttemptOutcome::Failed(StepExecutionError::permanent(format!(
                "no handler registered for step type {}",
                step.step_type
            )));
        };

        let context = StepContext {
            job_id: step.job_id,
            step_id: step.id.clone(),
            step_type: step.step_type,
            attempt: input.attempt,
            target: step.target.clone(),
            connection,
            job_context: input.job_context.clone(),
            dependency_results: input.dependency_results.clone(),
        };

        let timeout = Duration::from_secs(
            step.timeout_seconds
                .unwrap_or(self.ctx.config.execution.step_timeout_seconds),
        );
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, handler.execute(context)).await {
            Ok(result) => result,
            Err(_) => Err(StepExecutionError::transient(format!(
                "step exceeded its {}s timeout",
                timeout.as_secs()
            ))),
        };
        self.record(step, &component, MetricType::ExecutionTime, millis(started.elapsed()));

        match result {
            Ok(mut output) => {
                self.report_usage(step, &component, &output, allocations);
                if step.step_type == StepType::Scan {
                    self.attach_compliance(step, &mut output).await;
                }
                AttemptOutcome::Completed(output)
            }
            Err(err) => AttemptOutcome::Failed(err),
        }
    }

    async fn reserve(
        &self,
        step: &WorkflowStep,
        priority: i32,
        allocations: &mut Vec<ResourceAllocation>,
    ) -> crate::error::Result<()> {
        let policy = self.ctx.allocator.default_policy();
        for requirement in &step.resources {
            let mut request = AllocationRequest::new(
                step.job_id,
                requirement.resource_type.clone(),
                requirement.amount,
            )
            .for_step(step.id.clone())
            .with_priority(priority);
            if let Some(pool_id) = &requirement.pool_id {
                request = request.in_pool(pool_id.clone());
            }

            let allocation = self.ctx.allocator.allocate_with_retry(request, policy).await?;
            let allocation = self.ctx.allocator.activate(allocation.id)?;
            allocations.push(allocation);
        }
        Ok(())
    }

    fn report_usage(
        &self,
        step: &WorkflowStep,
        component: &str,
        output: &StepOutput,
        allocations: &[ResourceAllocation],
    ) {
        let usage: &ResourceUsageSample = &output.resource_usage;
        if usage.cpu_utilization > 0.0 {
            self.record(step, component, MetricType::CpuUtilization, usage.cpu_utilization);
        }
        if usage.memory_utilization > 0.0 {
            self.record(step, component, MetricType::MemoryUtilization, usage.memory_utilization);
        }
        if let Some(latency) = usage.latency_ms {
            self.record(step, component, MetricType::Latency, latency);
        }
        if let Some(quality) = output.quality_score {
            self.record(step, component, MetricType::QualityScore, quality);
        }

        for allocation in allocations {
            let actual = match allocation.resource_type {
                ResourceType::Cpu => allocation.allocated_amount * usage.cpu_utilization / 100.0,
                ResourceType::Memory => allocation.allocated_amount * usage.memory_utilization / 100.0,
                // No finer signal; count the reservation as used
                _ => allocation.allocated_amount,
            };
            if let Err(err) = self.ctx.allocator.record_usage(allocation.id, actual) {
                warn!(allocation_id = %allocation.id, error = %err, "Failed to record allocation usage");
            }
        }
    }

    async fn attach_compliance(&self, step: &WorkflowStep, output: &mut StepOutput) {
        match self
            .ctx
            .compliance
            .evaluate(step.job_id, step, &output.result)
            .await
        {
            Ok(report) => {
                let report = serde_json::to_value(&report).unwrap_or(Value::Null);
                match output.result.as_object_mut() {
                    Some(map) => {
                        map.insert("compliance".to_string(), report);
                    }
                    None => {
                        output.result = json!({ "output": output.result, "compliance": report });
                    }
                }
            }
            Err(err) => log_error(
                "step_executor",
                "compliance_evaluation",
                &err.to_string(),
                Some(&step.id),
            ),
        }
    }

    async fn release_all(&self, step: &WorkflowStep, allocations: &[ResourceAllocation]) {
        for allocation in allocations {
            if let Err(err) = self.ctx.allocator.release(allocation.id) {
                warn!(allocation_id = %allocation.id, error = %err, "Failed to release step allocation");
            }
            if let Ok(record) = self.ctx.allocator.get(allocation.id) {
                if let Err(err) = self.ctx.repository.save_allocation(&record).await {
                    log_error("step_executor", "persist_allocation", &err.to_string(), Some(&step.id));
                }
            }
        }
    }

    fn record(&self, step: &WorkflowStep, component: &str, metric_type: MetricType, value: f64) {
        self.ctx.metrics.record(
            PerformanceMetric::new(component, metric_type, value).for_step(step.job_id, step.id.clone()),
        );
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanflowConfig;
    use crate::models::{ResourceRequirement, StepSpec};
    use crate::registry::{HandlerRegistry, StepHandler};
    use crate::services::InMemoryComplianceEvaluator;
    use async_trait::async_trait;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Slow;

    #[async_trait]
    impl StepHandler for Slow {
        async fn execute(&self, _context: StepContext) -> Result<StepOutput, StepExecutionError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(StepOutput::new(json!({})))
        }
    }

    struct Busy;

    #[async_trait]
    impl StepHandler for Busy {
        async fn execute(&self, _context: StepContext) -> Result<StepOutput, StepExecutionError> {
            Ok(StepOutput::new(json!({ "sensitive_columns": ["ssn"] }))
                .with_quality(0.9)
                .with_usage(ResourceUsageSample {
                    cpu_utilization: 50.0,
                    ..Default::default()
                }))
        }
    }

    fn input() -> AttemptInput {
        AttemptInput {
            attempt: 1,
            job_priority: 0,
            job_context: Value::Null,
            dependency_results: HashMap::new(),
        }
    }

    fn step(spec: StepSpec) -> WorkflowStep {
        WorkflowStep::from_spec(Uuid::new_v4(), &spec, 0, 0)
    }

    #[tokio::test]
    async fn completed_scan_records_metrics_and_compliance() {
        let registry = HandlerRegistry::new();
        registry.register_for_type(StepType::Scan, Arc::new(Busy));
        let compliance = Arc::new(InMemoryComplianceEvaluator::new());
        let ctx = ServiceContext::builder(ScanflowConfig::default())
            .handlers(Arc::new(registry))
            .compliance(compliance.clone())
            .build();
        let executor = StepExecutor::new(ctx.clone());

        let step = step(
            StepSpec::new("scan", StepType::Scan)
                .with_target("postgres://orders")
                .with_resource(ResourceRequirement::new(ResourceType::Cpu, 4.0)),
        );
        let outcome = executor.execute(step.clone(), input(), CancellationToken::new()).await;

        let AttemptOutcome::Completed(output) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(output.result["compliance"]["compliant"], json!(false));
        assert_eq!(compliance.evaluated().len(), 1);
        assert_eq!(ctx.metrics.sample_count("scan", MetricType::CpuUtilization), 1);
        assert_eq!(ctx.metrics.success_rate("scan"), Some(1.0));

        let allocations = ctx.allocator.allocations_for_job(step.job_id);
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].usage_efficiency, Some(0.5));
        assert_eq!(ctx.allocator.overall_utilization(), 0.0);
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let registry = HandlerRegistry::new();
        registry.register_for_type(StepType::Scan, Arc::new(Slow));
        let ctx = ServiceContext::builder(ScanflowConfig::default())
            .handlers(Arc::new(registry))
            .build();
        let executor = StepExecutor::new(ctx);

        let step = step(StepSpec::new("scan", StepType::Scan).with_timeout_seconds(0));
        match executor.execute(step, input(), CancellationToken::new()).await {
            AttemptOutcome::Failed(err) => assert!(err.is_transient()),
            other => panic!("expected a timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_releases_resources() {
        let registry = HandlerRegistry::new();
        registry.register_for_type(StepType::Scan, Arc::new(Slow));
        let ctx = ServiceContext::builder(ScanflowConfig::default())
            .handlers(Arc::new(registry))
            .build();
        let executor = StepExecutor::new(ctx.clone());
        let cancel = CancellationToken::new();

        let step = step(
            StepSpec::new("scan", StepType::Scan)
                .with_resource(ResourceRequirement::new(ResourceType::Memory, 16.0)),
        );
        let job_id = step.job_id;
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { executor.execute(step, input(), cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), AttemptOutcome::Cancelled);
        assert!(ctx
            .allocator
            .allocations_for_job(job_id)
            .iter()
            .all(|a| !a.status.holds_capacity()));
    }

    struct Panicking;

    #[async_trait]
    impl StepHandler for Panicking {
        async fn execute(&self, _context: StepContext) -> Result<StepOutput, StepExecutionError> {
            panic!("handler bug");
        }
    }

    #[tokio::test]
    async fn panicking_handler_releases_resources() {
        let registry = HandlerRegistry::new();
        registry.register_for_type(StepType::Scan, Arc::new(Panicking));
        let ctx = ServiceContext::builder(ScanflowConfig::default())
            .handlers(Arc::new(registry))
            .build();
        let executor = StepExecutor::new(ctx.clone());

        let step = step(
            StepSpec::new("scan", StepType::Scan)
                .with_resource(ResourceRequirement::new(ResourceType::Cpu, 64.0)),
        );
        match executor.execute(step.clone(), input(), CancellationToken::new()).await {
            AttemptOutcome::Failed(err) => {
                assert!(!err.is_transient());
                assert!(err.to_string().contains("panicked"));
            }
            other => panic!("expected a failure, got {other:?}"),
        }
        assert_eq!(ctx.allocator.pool_snapshot("cpu").unwrap().allocated, 0.0);
        assert!(ctx
            .allocator
            .allocations_for_job(step.job_id)
            .iter()
            .all(|a| !a.status.holds_capacity()));
    }

    #[tokio::test]
    async fn missing_handler_is_permanent() {
        let ctx = ServiceContext::builder(ScanflowConfig::default())
            .handlers(Arc::new(HandlerRegistry::empty()))
            .build();
        let executor = StepExecutor::new(ctx);
        match executor
            .execute(step(StepSpec::new("v", StepType::Validation)), input(), CancellationToken::new())
            .await
        {
            AttemptOutcome::Failed(err) => assert!(!err.is_transient()),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
