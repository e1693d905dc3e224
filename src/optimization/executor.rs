//! # Optimization Executor
//!
//! Drives one recommendation through
//! `pending → analyzing → optimizing → testing → applying → completed | failed`.
//! Concrete tuning actions are carried out through a [`DirectiveSink`] (the job
//! controller's directive channel in production). Any failure after a change
//! was applied runs the rollback captured at apply time.
//!
//! The "after" snapshot only averages samples recorded once the change was
//! applied, collected over the configured observation window. Without any
//! such samples the improvement stays unmeasured.

use crate::constants::events;
use crate::error::{Result, ScanflowError};
use crate::logging::{log_error, log_optimization_operation};
use crate::models::{
    AppliedChange, OptimizationRecommendation, OptimizationResult, OptimizationStatus,
    PerformanceSnapshot,
};
use crate::orchestration::{ControllerDirective, ControllerHandle, ServiceContext};
use crate::services::{Notification, NotificationKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Samples averaged into a before/after snapshot
const SNAPSHOT_SAMPLES: usize = 20;

/// Relative worsening after which an applied change is rolled back
const REGRESSION_TOLERANCE: f64 = 0.1;

/// Applies controller directives on behalf of the executor
#[async_trait]
pub trait DirectiveSink: Send + Sync {
    async fn apply(&self, directive: ControllerDirective) -> Result<AppliedChange>;
}

#[async_trait]
impl DirectiveSink for ControllerHandle {
    async fn apply(&self, directive: ControllerDirective) -> Result<AppliedChange> {
        self.send(directive).await
    }
}

/// Improvement from `before` to `after`, positive when the metric got better
pub fn relative_improvement(
    before: &PerformanceSnapshot,
    after: &PerformanceSnapshot,
) -> Option<f64> {
    let (before_value, after_value) = (before.value?, after.value?);
    if before_value.abs() < f64::EPSILON {
        return None;
    }
    let change = (after_value - before_value) / before_value.abs();
    Some(if before.metric_type.lower_is_better() {
        -change
    } else {
        change
    })
}

pub struct OptimizationExecutor {
    ctx: ServiceContext,
    sink: Arc<dyn DirectiveSink>,
    results: Arc<DashMap<Uuid, OptimizationResult>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for OptimizationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationExecutor")
            .field("results", &self.results.len())
            .finish()
    }
}

impl OptimizationExecutor {
    /// `results` is keyed by recommendation id and shared with the recommender
    pub fn new(
        ctx: ServiceContext,
        sink: Arc<dyn DirectiveSink>,
        results: Arc<DashMap<Uuid, OptimizationResult>>,
    ) -> Self {
        Self {
            ctx,
            sink,
            results,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cut the observation window short once `shutdown` fires
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn snapshot(&self, recommendation: &OptimizationRecommendation) -> PerformanceSnapshot {
        let values = self.ctx.metrics.recent_values(
            &recommendation.target_component,
            recommendation.metric_type,
            SNAPSHOT_SAMPLES,
        );
        summarize(recommendation, &values)
    }

    /// Snapshot over samples recorded at or after `since`
    pub fn snapshot_since(
        &self,
        recommendation: &OptimizationRecommendation,
        since: DateTime<Utc>,
    ) -> PerformanceSnapshot {
        let samples = self.ctx.metrics.samples_since(
            &recommendation.target_component,
            recommendation.metric_type,
            since,
        );
        let skip = samples.len().saturating_sub(SNAPSHOT_SAMPLES);
        let values: Vec<f64> = samples.iter().skip(skip).map(|m| m.value).collect();
        summarize(recommendation, &values)
    }

    fn advance(&self, result: &mut OptimizationResult, status: OptimizationStatus) {
        result.advance(status);
        self.results.insert(result.recommendation_id, result.clone());
        debug!(recommendation_id = %result.recommendation_id, %status, "Optimization advanced");
        self.ctx.publisher.publish(
            events::OPTIMIZATION_STATUS_CHANGED,
            json!({
                "recommendation_id": result.recommendation_id,
                "result_id": result.id,
                "status": status,
            }),
        );
    }

    /// Run the full lifecycle for a `pending` recommendation
    #[instrument(skip_all, fields(recommendation_id = %recommendation.id))]
    pub async fn execute(&self, recommendation: &OptimizationRecommendation) -> Result<OptimizationResult> {
        let mut result = self
            .results
            .get(&recommendation.id)
            .map(|r| r.clone())
            .ok_or_else(|| ScanflowError::not_found("optimization result", recommendation.id))?;
        if result.status != OptimizationStatus::Pending {
            return Err(ScanflowError::StateTransition(format!(
                "optimization {} is {}, not pending",
                recommendation.id, result.status
            )));
        }

        log_optimization_operation(
            "execute",
            Some(recommendation.id),
            Some(&recommendation.target_component),
            "analyzing",
            Some(&recommendation.title),
        );
        match self.run_stages(recommendation, &mut result).await {
            Ok(()) => {
                self.advance(&mut result, OptimizationStatus::Completed);
                log_optimization_operation(
                    "execute",
                    Some(recommendation.id),
                    Some(&recommendation.target_component),
                    "completed",
                    result.actual_improvement.map(|i| format!("{i:.3}")).as_deref(),
                );
                self.ctx.publisher.publish(
                    events::OPTIMIZATION_COMPLETED,
                    json!({
                        "recommendation_id": recommendation.id,
                        "actual_improvement": result.actual_improvement,
                    }),
                );
            }
            Err(err) => self.fail(recommendation, &mut result, err).await,
        }

        if let Err(err) = self.ctx.repository.save_result(&result).await {
            log_error("optimization_executor", "persist_result", &err.to_string(), None);
        }
        Ok(result)
    }

    async fn run_stages(
        &self,
        recommendation: &OptimizationRecommendation,
        result: &mut OptimizationResult,
    ) -> Result<()> {
        self.advance(result, OptimizationStatus::Analyzing);
        result.before = Some(self.snapshot(recommendation));

        self.advance(result, OptimizationStatus::Optimizing);
        let directive = ControllerDirective::from_action(&recommendation.action, recommendation.job_id);

        self.advance(result, OptimizationStatus::Testing);
        if let Some(directive) = &directive {
            self.preflight(directive)?;
        }

        self.advance(result, OptimizationStatus::Applying);
        let change = match directive {
            Some(directive) => self.sink.apply(directive).await.map_err(|err| {
                ScanflowError::OptimizationApply(format!("{}: {err}", recommendation.title))
            })?,
            None => AppliedChange::nothing(format!("advisory: {}", recommendation.title)),
        };
        let applied_at = Utc::now();
        result.applied_change = Some(change);

        let observation = self.ctx.config.optimization.observation_window();
        if !observation.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(observation) => {}
                _ = self.shutdown.cancelled() => {
                    debug!("Observation window cut short by shutdown");
                }
            }
        }
        let after = self.snapshot_since(recommendation, applied_at);
        result.actual_improvement = result
            .before
            .as_ref()
            .and_then(|before| relative_improvement(before, &after));
        result.after = Some(after);

        match result.actual_improvement {
            Some(improvement) if improvement < -REGRESSION_TOLERANCE => {
                Err(ScanflowError::OptimizationApply(format!(
                    "{} regressed {} by {:.1}%",
                    recommendation.target_component,
                    recommendation.metric_type,
                    -improvement * 100.0
                )))
            }
            _ => Ok(()),
        }
    }

    /// Reject directives that cannot apply to the current system state
    fn preflight(&self, directive: &ControllerDirective) -> Result<()> {
        match directive {
            ControllerDirective::ResizePool {
                pool_id,
                capacity_factor,
            } => {
                if !(capacity_factor.is_finite() && *capacity_factor > 0.0) {
                    return Err(ScanflowError::OptimizationApply(format!(
                        "invalid capacity factor {capacity_factor}"
                    )));
                }
                let snapshot = self.ctx.allocator.pool_snapshot(pool_id)?;
                if snapshot.capacity * capacity_factor < snapshot.allocated {
                    return Err(ScanflowError::OptimizationApply(format!(
                        "pool {pool_id} holds {} and cannot shrink to {}",
                        snapshot.allocated,
                        snapshot.capacity * capacity_factor
                    )));
                }
                Ok(())
            }
            ControllerDirective::AdjustConcurrency { delta: 0, .. } => Err(
                ScanflowError::OptimizationApply("concurrency delta of zero".to_string()),
            ),
            _ => Ok(()),
        }
    }

    async fn fail(
        &self,
        recommendation: &OptimizationRecommendation,
        result: &mut OptimizationResult,
        err: ScanflowError,
    ) {
        result.error = Some(err.to_string());
        result.rollback_performed = true;

        if let Some(change) = result.applied_change.clone() {
            let rollback = ControllerDirective::Rollback(change.rollback);
            if let Err(rollback_err) = self.sink.apply(rollback).await {
                result.residual_side_effects.push(format!(
                    "rollback of '{}' failed: {rollback_err}",
                    change.description
                ));
            }
        }
        self.advance(result, OptimizationStatus::Failed);
        log_optimization_operation(
            "execute",
            Some(recommendation.id),
            Some(&recommendation.target_component),
            "failed",
            Some(&err.to_string()),
        );
        self.ctx.publisher.publish(
            events::OPTIMIZATION_FAILED,
            json!({
                "recommendation_id": recommendation.id,
                "error": err.to_string(),
                "rollback_performed": result.rollback_performed,
                "residual_side_effects": result.residual_side_effects,
            }),
        );

        let mut notification = Notification::new(
            NotificationKind::OptimizationFailed,
            format!("Optimization '{}' failed", recommendation.title),
            err.to_string(),
        );
        if let Some(job_id) = recommendation.job_id {
            notification = notification.for_job(job_id);
        }
        if let Err(notify_err) = self.ctx.notifier.dispatch(notification).await {
            log_error("optimization_executor", "notify", &notify_err.to_string(), None);
        }
    }
}

fn summarize(recommendation: &OptimizationRecommendation, values: &[f64]) -> PerformanceSnapshot {
    PerformanceSnapshot {
        component: recommendation.target_component.clone(),
        metric_type: recommendation.metric_type,
        value: crate::metrics::mean(values),
        sample_count: values.len(),
        captured_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanflowConfig;
    use crate::models::{
        ImplementationComplexity, MetricType, OptimizationType, RiskLevel, RollbackAction,
        TuningAction,
    };
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        applied: Mutex<Vec<ControllerDirective>>,
        fail_apply: bool,
    }

    #[async_trait]
    impl DirectiveSink for RecordingSink {
        async fn apply(&self, directive: ControllerDirective) -> Result<AppliedChange> {
            self.applied.lock().push(directive.clone());
            match directive {
                ControllerDirective::Rollback(_) => Ok(AppliedChange::nothing("rolled back")),
                _ if self.fail_apply => Err(ScanflowError::Shutdown("controller gone".into())),
                _ => Ok(AppliedChange {
                    description: "concurrency +2".into(),
                    rollback: RollbackAction::RestoreConcurrency {
                        per_job: vec![],
                        default: Some(10),
                    },
                }),
            }
        }
    }

    fn recommendation(action: TuningAction) -> OptimizationRecommendation {
        OptimizationRecommendation {
            id: Uuid::new_v4(),
            optimization_type: OptimizationType::ConcurrencyTuning,
            target_component: "scan".into(),
            job_id: None,
            title: "raise concurrency".into(),
            description: "raise concurrency".into(),
            expected_improvement: 0.3,
            confidence: 0.8,
            implementation_complexity: ImplementationComplexity::Low,
            estimated_effort_hours: 1.0,
            risk_level: RiskLevel::Low,
            prerequisites: vec![],
            implementation_steps: vec![],
            rollback_steps: vec![],
            action,
            metric_type: MetricType::QueueWaitTime,
            source_bottleneck: None,
            created_at: Utc::now(),
        }
    }

    fn executor_observing(
        sink: Arc<RecordingSink>,
        observation_window_secs: u64,
    ) -> (OptimizationExecutor, Arc<DashMap<Uuid, OptimizationResult>>) {
        let mut config = ScanflowConfig::default();
        config.optimization.observation_window_secs = observation_window_secs;
        let ctx = ServiceContext::builder(config).build();
        let results = Arc::new(DashMap::new());
        (OptimizationExecutor::new(ctx, sink, results.clone()), results)
    }

    fn executor(sink: Arc<RecordingSink>) -> (OptimizationExecutor, Arc<DashMap<Uuid, OptimizationResult>>) {
        executor_observing(sink, 0)
    }

    /// Record `value` for the target shortly after the change is applied
    fn record_during_observation(executor: &OptimizationExecutor, value: f64) {
        let metrics = executor.ctx.metrics.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            for _ in 0..3 {
                metrics.record_value("scan", MetricType::QueueWaitTime, value);
            }
        });
    }

    #[tokio::test]
    async fn successful_run_walks_every_stage() {
        let sink = Arc::new(RecordingSink::default());
        let (executor, results) = executor(sink.clone());
        let rec = recommendation(TuningAction::AdjustConcurrency { delta: 2 });
        results.insert(rec.id, OptimizationResult::new(rec.id, OptimizationStatus::Pending));

        let result = executor.execute(&rec).await.unwrap();
        assert_eq!(
            result.statuses(),
            vec![
                OptimizationStatus::Pending,
                OptimizationStatus::Analyzing,
                OptimizationStatus::Optimizing,
                OptimizationStatus::Testing,
                OptimizationStatus::Applying,
                OptimizationStatus::Completed,
            ]
        );
        assert!(!result.rollback_performed);
        assert_eq!(sink.applied.lock().len(), 1);
        assert_eq!(results.get(&rec.id).unwrap().status, OptimizationStatus::Completed);
    }

    #[tokio::test]
    async fn failed_apply_records_rollback() {
        let sink = Arc::new(RecordingSink {
            fail_apply: true,
            ..Default::default()
        });
        let (executor, results) = executor(sink);
        let rec = recommendation(TuningAction::AdjustConcurrency { delta: 2 });
        results.insert(rec.id, OptimizationResult::new(rec.id, OptimizationStatus::Pending));

        let result = executor.execute(&rec).await.unwrap();
        assert_eq!(result.status, OptimizationStatus::Failed);
        assert!(result.rollback_performed);
        assert!(result.error.unwrap().contains("controller gone"));
    }

    #[test]
    fn improvement_direction_follows_metric() {
        let before = PerformanceSnapshot {
            component: "scan".into(),
            metric_type: MetricType::QueueWaitTime,
            value: Some(100.0),
            sample_count: 5,
            captured_at: Utc::now(),
        };
        let slower = PerformanceSnapshot {
            value: Some(150.0),
            ..before.clone()
        };
        assert!((relative_improvement(&before, &slower).unwrap() + 0.5).abs() < 1e-9);

        let throughput = PerformanceSnapshot {
            metric_type: MetricType::Throughput,
            ..before.clone()
        };
        let faster = PerformanceSnapshot {
            value: Some(120.0),
            ..throughput.clone()
        };
        assert!((relative_improvement(&throughput, &faster).unwrap() - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn pre_apply_samples_do_not_count_as_after() {
        let sink = Arc::new(RecordingSink::default());
        let (executor, results) = executor(sink.clone());
        let rec = recommendation(TuningAction::AdjustConcurrency { delta: 2 });
        results.insert(rec.id, OptimizationResult::new(rec.id, OptimizationStatus::Pending));
        executor
            .ctx
            .metrics
            .record_value("scan", MetricType::QueueWaitTime, 100.0);

        let result = executor.execute(&rec).await.unwrap();
        assert_eq!(result.status, OptimizationStatus::Completed);
        assert_eq!(result.before.as_ref().unwrap().value, Some(100.0));
        assert_eq!(result.after.as_ref().unwrap().sample_count, 0);
        assert_eq!(result.actual_improvement, None);
        assert_eq!(sink.applied.lock().len(), 1);
    }

    #[tokio::test]
    async fn post_apply_samples_measure_improvement() {
        let sink = Arc::new(RecordingSink::default());
        let (executor, results) = executor_observing(sink.clone(), 1);
        let rec = recommendation(TuningAction::AdjustConcurrency { delta: 2 });
        results.insert(rec.id, OptimizationResult::new(rec.id, OptimizationStatus::Pending));
        for _ in 0..3 {
            executor.ctx.metrics.record_value("scan", MetricType::QueueWaitTime, 100.0);
        }
        record_during_observation(&executor, 60.0);

        let result = executor.execute(&rec).await.unwrap();
        assert_eq!(result.status, OptimizationStatus::Completed);
        assert_eq!(result.after.as_ref().unwrap().sample_count, 3);
        assert!((result.actual_improvement.unwrap() - 0.4).abs() < 1e-9);
        assert!(!result.rollback_performed);
    }

    #[tokio::test]
    async fn post_apply_regression_rolls_back() {
        let sink = Arc::new(RecordingSink::default());
        let (executor, results) = executor_observing(sink.clone(), 1);
        let rec = recommendation(TuningAction::AdjustConcurrency { delta: 2 });
        results.insert(rec.id, OptimizationResult::new(rec.id, OptimizationStatus::Pending));
        for _ in 0..3 {
            executor.ctx.metrics.record_value("scan", MetricType::QueueWaitTime, 100.0);
        }
        record_during_observation(&executor, 150.0);

        let result = executor.execute(&rec).await.unwrap();
        assert_eq!(result.status, OptimizationStatus::Failed);
        assert!(result.rollback_performed);
        assert!((result.actual_improvement.unwrap() + 0.5).abs() < 1e-9);
        let applied = sink.applied.lock();
        assert_eq!(applied.len(), 2);
        assert!(matches!(applied[1], ControllerDirective::Rollback(_)));
    }

    #[tokio::test]
    async fn resize_beyond_allocated_fails_preflight() {
        let sink = Arc::new(RecordingSink::default());
        let (executor, results) = executor(sink.clone());
        let rec = recommendation(TuningAction::ResizePool {
            pool_id: "missing".into(),
            capacity_factor: 2.0,
        });
        results.insert(rec.id, OptimizationResult::new(rec.id, OptimizationStatus::Pending));

        let result = executor.execute(&rec).await.unwrap();
        assert_eq!(result.status, OptimizationStatus::Failed);
        assert!(sink.applied.lock().is_empty());
    }

    #[tokio::test]
    async fn only_pending_results_execute() {
        let (executor, results) = executor(Arc::new(RecordingSink::default()));
        let rec = recommendation(TuningAction::Advisory);
        results.insert(
            rec.id,
            OptimizationResult::new(rec.id, OptimizationStatus::AwaitingApproval),
        );
        assert!(executor.execute(&rec).await.is_err());
    }
}
