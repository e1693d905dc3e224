//! # Optimization Recommender
//!
//! Turns bottleneck detections, degrading trends and under-used pools into
//! ranked recommendations, decides which are applied automatically and which
//! wait for approval, and feeds approved work to the [`OptimizationExecutor`].

use super::catalog;
use super::executor::{DirectiveSink, OptimizationExecutor};
use super::predictive::PredictiveAnalyzer;
use super::ranking::{rank, RankedRecommendation};
use crate::constants::{events, LOW_EFFICIENCY_THRESHOLD};
use crate::error::{Result, ScanflowError};
use crate::logging::{log_error, log_optimization_operation};
use crate::models::{
    BottleneckDetection, MetricType, OptimizationConstraints, OptimizationRecommendation,
    OptimizationResult, OptimizationStatus,
};
use crate::orchestration::ServiceContext;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Answer to an optimization status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatusReport {
    pub recommendation: OptimizationRecommendation,
    pub score: f64,
    pub result: OptimizationResult,
}

pub struct OptimizationRecommender {
    ctx: ServiceContext,
    executor: OptimizationExecutor,
    analyzer: PredictiveAnalyzer,
    recommendations: DashMap<Uuid, RankedRecommendation>,
    results: Arc<DashMap<Uuid, OptimizationResult>>,
    pending: Mutex<VecDeque<Uuid>>,
    /// Terminal recommendations, oldest first, evicted past the retention limit
    finished: Mutex<VecDeque<Uuid>>,
}

impl std::fmt::Debug for OptimizationRecommender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationRecommender")
            .field("recommendations", &self.recommendations.len())
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl OptimizationRecommender {
    pub fn new(ctx: ServiceContext, sink: Arc<dyn DirectiveSink>) -> Self {
        let results = Arc::new(DashMap::new());
        let optimization = &ctx.config.optimization;
        let analyzer = PredictiveAnalyzer::new(
            optimization.predictive_window,
            optimization.predictive_risk_threshold,
        );
        Self {
            executor: OptimizationExecutor::new(ctx.clone(), sink, Arc::clone(&results)),
            ctx,
            analyzer,
            recommendations: DashMap::new(),
            results,
            pending: Mutex::new(VecDeque::new()),
            finished: Mutex::new(VecDeque::new()),
        }
    }

    /// Let shutdown interrupt an optimization's observation window
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.executor = self.executor.with_shutdown(shutdown);
        self
    }

    fn constraints<'a>(
        &'a self,
        constraints: Option<&'a OptimizationConstraints>,
    ) -> &'a OptimizationConstraints {
        constraints.unwrap_or(&self.ctx.config.optimization.constraints)
    }

    /// Ranked catalog recommendations for one detection
    pub fn recommend(
        &self,
        detection: &BottleneckDetection,
        constraints: Option<&OptimizationConstraints>,
    ) -> Vec<RankedRecommendation> {
        let limit = self.ctx.config.optimization.max_recommendations_per_bottleneck;
        rank(
            catalog::recommendations_for(detection, limit),
            self.constraints(constraints),
        )
    }

    /// Recommend for a detection and register every surviving recommendation
    #[instrument(skip_all, fields(component = %detection.component, bottleneck_type = %detection.bottleneck_type))]
    pub async fn handle_detection(&self, detection: &BottleneckDetection) -> Vec<Uuid> {
        let mut submitted = Vec::new();
        for ranked in self.recommend(detection, None) {
            if let Some(id) = self.submit(ranked).await {
                submitted.push(id);
            }
        }
        submitted
    }

    fn has_open_duplicate(&self, candidate: &OptimizationRecommendation) -> bool {
        self.recommendations.iter().any(|entry| {
            let existing = &entry.value().recommendation;
            existing.target_component == candidate.target_component
                && existing.optimization_type == candidate.optimization_type
                && existing.job_id == candidate.job_id
                && self
                    .results
                    .get(&existing.id)
                    .is_some_and(|r| !r.status.is_terminal())
        })
    }

    fn auto_applicable(&self, ranked: &RankedRecommendation) -> bool {
        let config = &self.ctx.config.optimization;
        let rec = &ranked.recommendation;
        config.auto_apply
            && !rec.action.is_advisory()
            && rec.risk_level <= config.auto_apply_max_risk
            && ranked.score >= config.min_auto_apply_score
    }

    /// Register a ranked recommendation; `None` when an equivalent one is still open
    pub async fn submit(&self, ranked: RankedRecommendation) -> Option<Uuid> {
        if self.has_open_duplicate(&ranked.recommendation) {
            debug!(
                component = %ranked.recommendation.target_component,
                optimization_type = %ranked.recommendation.optimization_type,
                "Equivalent recommendation already open"
            );
            return None;
        }

        let id = ranked.recommendation.id;
        let status = if self.auto_applicable(&ranked) {
            OptimizationStatus::Pending
        } else {
            OptimizationStatus::AwaitingApproval
        };
        let result = OptimizationResult::new(id, status);

        if let Err(err) = self.ctx.repository.save_recommendation(&ranked.recommendation).await {
            log_error("optimization_recommender", "persist_recommendation", &err.to_string(), None);
        }
        if let Err(err) = self.ctx.repository.save_result(&result).await {
            log_error("optimization_recommender", "persist_result", &err.to_string(), None);
        }

        log_optimization_operation(
            "recommend",
            Some(id),
            Some(&ranked.recommendation.target_component),
            &status.to_string(),
            Some(&ranked.recommendation.title),
        );
        self.ctx.publisher.publish(
            events::RECOMMENDATION_CREATED,
            json!({
                "recommendation_id": id,
                "optimization_type": ranked.recommendation.optimization_type,
                "target_component": ranked.recommendation.target_component,
                "score": ranked.score,
                "status": status,
            }),
        );

        self.results.insert(id, result);
        self.recommendations.insert(id, ranked);
        match status {
            OptimizationStatus::Pending => self.pending.lock().push_back(id),
            _ => self.ctx.publisher.publish(
                events::OPTIMIZATION_AWAITING_APPROVAL,
                json!({ "recommendation_id": id }),
            ),
        }
        Some(id)
    }

    fn result_in(&self, id: Uuid, expected: OptimizationStatus) -> Result<OptimizationResult> {
        let result = self
            .results
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| ScanflowError::not_found("recommendation", id))?;
        if result.status != expected {
            return Err(ScanflowError::StateTransition(format!(
                "recommendation {id} is {}, expected {expected}",
                result.status
            )));
        }
        Ok(result)
    }

    /// `awaiting_approval → pending`; queued for execution
    pub fn approve(&self, id: Uuid) -> Result<()> {
        let mut result = self.result_in(id, OptimizationStatus::AwaitingApproval)?;
        result.advance(OptimizationStatus::Pending);
        self.results.insert(id, result);
        self.pending.lock().push_back(id);
        log_optimization_operation("approve", Some(id), None, "pending", None);
        Ok(())
    }

    pub async fn reject(&self, id: Uuid) -> Result<()> {
        let mut result = self.result_in(id, OptimizationStatus::AwaitingApproval)?;
        result.advance(OptimizationStatus::Rejected);
        self.results.insert(id, result.clone());
        if let Err(err) = self.ctx.repository.save_result(&result).await {
            log_error("optimization_recommender", "persist_result", &err.to_string(), None);
        }
        log_optimization_operation("reject", Some(id), None, "rejected", None);
        self.ctx
            .publisher
            .publish(events::OPTIMIZATION_REJECTED, json!({ "recommendation_id": id }));
        self.retire(id);
        Ok(())
    }

    /// Track a terminal recommendation and evict the oldest past the retention
    /// limit; the repository keeps the full record
    fn retire(&self, id: Uuid) {
        let limit = self.ctx.config.optimization.result_retention;
        let evicted: Vec<Uuid> = {
            let mut finished = self.finished.lock();
            finished.push_back(id);
            let excess = finished.len().saturating_sub(limit);
            finished.drain(..excess).collect()
        };
        for old in evicted {
            self.recommendations.remove(&old);
            self.results.remove(&old);
            debug!(recommendation_id = %old, "Evicted finished recommendation");
        }
    }

    pub fn optimization_status(&self, id: Uuid) -> Result<OptimizationStatusReport> {
        let ranked = self
            .recommendations
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| ScanflowError::not_found("recommendation", id))?;
        let result = self
            .results
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| ScanflowError::not_found("optimization result", id))?;
        Ok(OptimizationStatusReport {
            recommendation: ranked.recommendation,
            score: ranked.score,
            result,
        })
    }

    /// Every recommendation, best score first
    pub fn list_recommendations(&self) -> Vec<RankedRecommendation> {
        let mut all: Vec<RankedRecommendation> =
            self.recommendations.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.recommendation.created_at.cmp(&b.recommendation.created_at))
        });
        all
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Proactive recommendations for degrading trends
    pub async fn run_predictive_once(&self) -> Vec<Uuid> {
        let constraints = self.constraints(None).clone();
        let mut submitted = Vec::new();
        for forecast in self.analyzer.analyze(&self.ctx.metrics) {
            debug!(
                component = %forecast.component,
                metric_type = %forecast.metric_type,
                risk = forecast.risk,
                "Degradation predicted"
            );
            let recommendation = catalog::predictive_recommendation(
                &forecast.component,
                forecast.metric_type,
                forecast.risk,
            );
            for ranked in rank(vec![recommendation], &constraints) {
                if let Some(id) = self.submit(ranked).await {
                    submitted.push(id);
                }
            }
        }
        submitted
    }

    /// `resource_efficiency` recommendations for pools with low usage efficiency
    pub async fn run_efficiency_once(&self) -> Vec<Uuid> {
        let constraints = self.constraints(None).clone();
        let mut submitted = Vec::new();
        for efficiency in self.ctx.allocator.efficiency_report() {
            let low = efficiency
                .average_efficiency
                .is_some_and(|avg| avg < LOW_EFFICIENCY_THRESHOLD);
            if !low {
                continue;
            }
            let metric_type = self
                .ctx
                .allocator
                .pool_snapshot(&efficiency.pool_id)
                .ok()
                .and_then(|s| s.resource_type.utilization_metric())
                .unwrap_or(MetricType::StorageUtilization);
            let Some(recommendation) = catalog::efficiency_recommendation(&efficiency, metric_type)
            else {
                continue;
            };
            for ranked in rank(vec![recommendation], &constraints) {
                if let Some(id) = self.submit(ranked).await {
                    submitted.push(id);
                }
            }
        }
        submitted
    }

    /// Take the best-scored pending id; earlier submissions win ties
    fn pop_best_pending(&self) -> Option<Uuid> {
        let mut pending = self.pending.lock();
        let mut best: Option<(usize, f64)> = None;
        for (index, id) in pending.iter().enumerate() {
            let score = self
                .recommendations
                .get(id)
                .map_or(f64::NEG_INFINITY, |r| r.score);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((index, score));
            }
        }
        let (index, _) = best?;
        pending.remove(index)
    }

    /// Execute the highest-scored pending recommendation, waiting for it to finish
    pub async fn execute_next(&self) -> Option<OptimizationResult> {
        let id = self.pop_best_pending()?;
        let recommendation = self.recommendations.get(&id).map(|r| r.recommendation.clone())?;
        let outcome = self.executor.execute(&recommendation).await;
        self.retire(id);
        match outcome {
            Ok(result) => Some(result),
            Err(err) => {
                log_error("optimization_recommender", "execute", &err.to_string(), Some(&id.to_string()));
                None
            }
        }
    }

    /// Consume detections from the monitor until the channel closes or `shutdown` fires
    pub async fn run_detection_consumer(
        self: Arc<Self>,
        mut detections: mpsc::Receiver<BottleneckDetection>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                detection = detections.recv() => {
                    let Some(detection) = detection else { break };
                    self.handle_detection(&detection).await;
                }
            }
        }
        info!("💡 Detection consumer stopped");
    }

    /// Poll for pending recommendations and execute them one at a time
    pub async fn run_execution_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut poll = tokio::time::interval(self.ctx.config.optimization.execution_poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = poll.tick() => {
                    while !shutdown.is_cancelled() {
                        if self.pending_count() == 0 {
                            break;
                        }
                        self.execute_next().await;
                    }
                }
            }
        }
        info!("⚙️ Optimization execution loop stopped");
    }

    /// Periodic predictive and efficiency analysis
    pub async fn run_predictive_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.ctx.config.optimization.predictive_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    let predicted = self.run_predictive_once().await;
                    let efficiency = self.run_efficiency_once().await;
                    debug!(predicted = predicted.len(), efficiency = efficiency.len(), "Predictive pass");
                }
            }
        }
        info!("🔮 Predictive analysis loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanflowConfig;
    use crate::models::{AppliedChange, BottleneckType};
    use crate::orchestration::ControllerDirective;
    use async_trait::async_trait;
    use chrono::Utc;

    struct AcceptAll;

    #[async_trait]
    impl DirectiveSink for AcceptAll {
        async fn apply(&self, directive: ControllerDirective) -> Result<AppliedChange> {
            Ok(AppliedChange::nothing(directive.name()))
        }
    }

    fn recommender(mut config: ScanflowConfig) -> OptimizationRecommender {
        config.optimization.observation_window_secs = 0;
        OptimizationRecommender::new(ServiceContext::builder(config).build(), Arc::new(AcceptAll))
    }

    fn manual_config(result_retention: usize) -> ScanflowConfig {
        let mut config = ScanflowConfig::default();
        config.optimization.auto_apply = false;
        config.optimization.result_retention = result_retention;
        config
    }

    async fn submit_scored(recommender: &OptimizationRecommender, scores: &[f64]) -> Vec<Uuid> {
        let recs = catalog::recommendations_for(&detection(BottleneckType::IoBound, "scan"), scores.len());
        assert_eq!(recs.len(), scores.len());
        let mut ids = Vec::new();
        for (recommendation, score) in recs.into_iter().zip(scores.iter().copied()) {
            let ranked = RankedRecommendation { recommendation, score };
            ids.push(recommender.submit(ranked).await.unwrap());
        }
        ids
    }

    fn detection(bottleneck_type: BottleneckType, component: &str) -> BottleneckDetection {
        BottleneckDetection {
            id: Uuid::new_v4(),
            bottleneck_type,
            component: component.to_string(),
            job_id: None,
            severity: 0.95,
            impact_score: 0.76,
            metric_type: MetricType::CpuUtilization,
            observed_value: 95.0,
            threshold: 80.0,
            resolution_suggestions: bottleneck_type.resolution_suggestions(),
            estimated_improvement: 0.38,
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn low_risk_pool_scaling_is_auto_applied() {
        let recommender = recommender(ScanflowConfig::default());
        let ids = recommender
            .handle_detection(&detection(BottleneckType::CpuBound, "pool:cpu"))
            .await;
        assert_eq!(ids.len(), 3);

        let statuses: Vec<OptimizationStatus> = ids
            .iter()
            .map(|id| recommender.optimization_status(*id).unwrap().result.status)
            .collect();
        assert_eq!(
            statuses.iter().filter(|s| **s == OptimizationStatus::Pending).count(),
            1
        );
        assert_eq!(recommender.pending_count(), 1);

        let result = recommender.execute_next().await.unwrap();
        assert_eq!(result.status, OptimizationStatus::Completed);
    }

    #[tokio::test]
    async fn repeated_detection_does_not_duplicate_open_work() {
        let recommender = recommender(ScanflowConfig::default());
        let detection = detection(BottleneckType::IoBound, "scan");
        let first = recommender.handle_detection(&detection).await;
        let second = recommender.handle_detection(&detection).await;
        assert!(!first.is_empty());
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn approval_flow() {
        let recommender = recommender(ScanflowConfig::default());
        let ids = recommender
            .handle_detection(&detection(BottleneckType::IoBound, "scan"))
            .await;
        let (approved, rejected) = (ids[0], ids[1]);

        recommender.approve(approved).unwrap();
        assert!(recommender.approve(approved).is_err());
        recommender.reject(rejected).await.unwrap();
        assert_eq!(
            recommender.optimization_status(rejected).unwrap().result.status,
            OptimizationStatus::Rejected
        );

        let result = recommender.execute_next().await.unwrap();
        assert_eq!(result.recommendation_id, approved);
        assert_eq!(result.status, OptimizationStatus::Completed);
    }

    #[tokio::test]
    async fn list_is_sorted_by_score() {
        let recommender = recommender(ScanflowConfig::default());
        recommender
            .handle_detection(&detection(BottleneckType::MemoryBound, "scan"))
            .await;
        let listed = recommender.list_recommendations();
        assert!(listed.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn best_scored_pending_work_runs_first() {
        let recommender = recommender(manual_config(500));
        let ids = submit_scored(&recommender, &[0.2, 0.9]).await;
        for id in &ids {
            recommender.approve(*id).unwrap();
        }

        let first = recommender.execute_next().await.unwrap();
        assert_eq!(first.recommendation_id, ids[1]);
        let second = recommender.execute_next().await.unwrap();
        assert_eq!(second.recommendation_id, ids[0]);
        assert!(recommender.execute_next().await.is_none());
    }

    #[tokio::test]
    async fn finished_recommendations_are_evicted_past_retention() {
        let recommender = recommender(manual_config(1));
        let ids = submit_scored(&recommender, &[0.5, 0.4]).await;
        recommender.reject(ids[0]).await.unwrap();
        recommender.reject(ids[1]).await.unwrap();

        let err = recommender.optimization_status(ids[0]).unwrap_err();
        assert_eq!(err.cause(), "not_found");
        assert_eq!(
            recommender.optimization_status(ids[1]).unwrap().result.status,
            OptimizationStatus::Rejected
        );
        assert_eq!(recommender.list_recommendations().len(), 1);
    }
}
