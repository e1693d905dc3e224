use super::detector::BottleneckDetector;
use crate::constants::{events, pool_component};
use crate::logging::log_error;
use crate::models::{BottleneckDetection, MetricType, PerformanceMetric};
use crate::orchestration::ServiceContext;
use crate::services::{Notification, NotificationKind};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Detections retained for status queries
const DETECTION_HISTORY_LIMIT: usize = 500;

/// Samples pool utilization, runs the detector and forwards detections
pub struct PerformanceMonitor {
    ctx: ServiceContext,
    detector: BottleneckDetector,
    history: RwLock<VecDeque<BottleneckDetection>>,
    detections: Option<mpsc::Sender<BottleneckDetection>>,
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("history", &self.history.read().len())
            .field("forwarding", &self.detections.is_some())
            .finish()
    }
}

impl PerformanceMonitor {
    pub fn new(ctx: ServiceContext) -> Self {
        let detector = BottleneckDetector::new(ctx.config.monitoring.clone());
        Self {
            ctx,
            detector,
            history: RwLock::new(VecDeque::new()),
            detections: None,
        }
    }

    /// Forward every new detection to the recommender
    pub fn with_detection_sink(mut self, sink: mpsc::Sender<BottleneckDetection>) -> Self {
        self.detections = Some(sink);
        self
    }

    pub fn detector(&self) -> &BottleneckDetector {
        &self.detector
    }

    /// Metrics ingestion entry point for step executors and external collectors
    pub fn ingest(&self, metric: PerformanceMetric) {
        self.ctx.metrics.record(metric);
    }

    /// Record each pool's utilization as a percentage under `pool:<id>`
    pub fn sample_pools(&self) -> usize {
        let mut sampled = 0;
        for snapshot in self.ctx.allocator.pool_snapshots() {
            let Some(metric_type) = snapshot.resource_type.utilization_metric() else {
                continue;
            };
            self.ctx.metrics.record_value(
                &pool_component(&snapshot.pool_id),
                metric_type,
                snapshot.utilization * 100.0,
            );
            sampled += 1;
        }
        sampled
    }

    /// Record `1 − success_rate` per component as its error rate
    pub fn sample_error_rates(&self) {
        let components: BTreeSet<String> = self
            .ctx
            .metrics
            .series_keys()
            .into_iter()
            .map(|(component, _)| component)
            .collect();
        for component in components {
            if let Some(rate) = self.ctx.metrics.success_rate(&component) {
                self.ctx
                    .metrics
                    .record_value(&component, MetricType::ErrorRate, 1.0 - rate);
            }
        }
    }

    /// Run detection over every component with samples
    #[instrument(skip(self))]
    pub async fn detect_once(&self) -> Vec<BottleneckDetection> {
        let components: BTreeSet<String> = self
            .ctx
            .metrics
            .series_keys()
            .into_iter()
            .map(|(component, _)| component)
            .collect();

        let mut detected = Vec::new();
        for component in components {
            detected.extend(self.detector.detect(&self.ctx.metrics, &component));
        }
        for detection in &detected {
            self.report(detection).await;
        }
        detected
    }

    async fn report(&self, detection: &BottleneckDetection) {
        info!(
            component = %detection.component,
            bottleneck_type = %detection.bottleneck_type,
            severity = detection.severity,
            impact_score = detection.impact_score,
            "🔍 Bottleneck detected"
        );
        {
            let mut history = self.history.write();
            if history.len() >= DETECTION_HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(detection.clone());
        }

        self.ctx.publisher.publish(
            events::BOTTLENECK_DETECTED,
            json!({
                "detection_id": detection.id,
                "component": detection.component,
                "bottleneck_type": detection.bottleneck_type,
                "severity": detection.severity,
                "impact_score": detection.impact_score,
                "job_id": detection.job_id,
            }),
        );

        if detection.severity >= self.ctx.config.monitoring.alert_severity_threshold {
            let mut notification = Notification::new(
                NotificationKind::BottleneckAlert,
                format!("{} on {}", detection.bottleneck_type, detection.component),
                format!(
                    "{} = {:.1} (threshold {:.1})",
                    detection.metric_type, detection.observed_value, detection.threshold
                ),
            )
            .with_severity(detection.severity);
            if let Some(job_id) = detection.job_id {
                notification = notification.for_job(job_id);
            }
            if let Err(err) = self.ctx.notifier.dispatch(notification).await {
                log_error("performance_monitor", "alert", &err.to_string(), Some(&detection.component));
            }
        }

        if let Some(sink) = &self.detections {
            if sink.send(detection.clone()).await.is_err() {
                warn!("Detection receiver closed; bottleneck not forwarded");
            }
        }
    }

    /// Most recent detections, oldest first
    pub fn recent_detections(&self, limit: usize) -> Vec<BottleneckDetection> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Tiered sampling loop; returns once `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let config = &self.ctx.config.monitoring;
        let mut real_time = tokio::time::interval(config.real_time_interval());
        let mut short_term = tokio::time::interval(config.short_term_interval());
        let mut medium_term = tokio::time::interval(config.medium_term_interval());
        let mut long_term = tokio::time::interval(config.long_term_interval());
        let mut baselines = tokio::time::interval(config.baseline_refresh_interval());
        for interval in [
            &mut real_time,
            &mut short_term,
            &mut medium_term,
            &mut long_term,
            &mut baselines,
        ] {
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!("📈 Performance monitor started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = real_time.tick() => {
                    self.sample_pools();
                }
                _ = short_term.tick() => {
                    let found = self.detect_once().await;
                    debug!(detections = found.len(), "Short-term detection pass");
                }
                _ = medium_term.tick() => self.sample_error_rates(),
                _ = baselines.tick() => {
                    self.ctx.metrics.refresh_baselines();
                }
                _ = long_term.tick() => {
                    let pruned = self.detector.prune_cooldowns();
                    info!(
                        total_samples = self.ctx.metrics.total_samples(),
                        detections = self.history.read().len(),
                        pruned_cooldowns = pruned,
                        "📊 Long-term monitoring summary"
                    );
                }
            }
        }
        info!("📈 Performance monitor stopped");
    }
}
