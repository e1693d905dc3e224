//! Threshold-based bottleneck detection over the metrics store.
//!
//! Rules are fixed heuristics: utilization above a percentage threshold for a
//! run of consecutive samples, latency or queue wait above a millisecond
//! threshold, and execution time degraded against the component baseline.

use crate::config::MonitoringConfig;
use crate::metrics::{mean, MetricsStore};
use crate::models::{BottleneckDetection, BottleneckType, MetricType};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// `min(utilization / 100, 1)`
pub fn utilization_severity(percent: f64) -> f64 {
    (percent / 100.0).clamp(0.0, 1.0)
}

/// `min(value / ceiling, 1)`
pub fn latency_severity(millis: f64, ceiling_ms: f64) -> f64 {
    if ceiling_ms <= 0.0 {
        return 1.0;
    }
    (millis / ceiling_ms).clamp(0.0, 1.0)
}

/// `clamp((ratio − 1) / 2, 0, 1)`
pub fn degradation_severity(ratio: f64) -> f64 {
    ((ratio - 1.0) / 2.0).clamp(0.0, 1.0)
}

/// `severity × type_weight × reliability_factor`, clamped to [0,1]
pub fn impact_score(
    severity: f64,
    bottleneck_type: BottleneckType,
    success_rate: Option<f64>,
    config: &MonitoringConfig,
) -> f64 {
    let reliability = match success_rate {
        Some(rate) if rate < config.reliability_success_rate => config.reliability_factor,
        _ => 1.0,
    };
    (severity * bottleneck_type.type_weight() * reliability).clamp(0.0, 1.0)
}

/// A rule that fired, before cooldown and scoring
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bottleneck_type: BottleneckType,
    pub metric_type: MetricType,
    pub observed_value: f64,
    pub threshold: f64,
    pub severity: f64,
}

/// Utilization rules: metric, percent threshold and the bottleneck it signals
fn utilization_rules(config: &MonitoringConfig) -> [(MetricType, f64, BottleneckType); 4] {
    [
        (MetricType::CpuUtilization, config.cpu_threshold, BottleneckType::CpuBound),
        (MetricType::MemoryUtilization, config.memory_threshold, BottleneckType::MemoryBound),
        (MetricType::NetworkUtilization, config.network_threshold, BottleneckType::NetworkBound),
        (
            MetricType::DbConnectionUtilization,
            config.database_threshold,
            BottleneckType::DatabaseBound,
        ),
    ]
}

/// Detects bottlenecks per component and suppresses repeats within the cooldown
#[derive(Debug)]
pub struct BottleneckDetector {
    config: MonitoringConfig,
    last_emitted: Mutex<HashMap<(String, BottleneckType), Instant>>,
}

impl BottleneckDetector {
    pub fn new(config: MonitoringConfig) -> Self {
        Self {
            config,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    /// Rules that fire for `component` given the current samples and baselines
    pub fn candidates(&self, metrics: &MetricsStore, component: &str) -> Vec<Candidate> {
        let config = &self.config;
        let window = config.min_consecutive_samples.max(1);
        let mut found = Vec::new();

        for (metric_type, threshold, bottleneck_type) in utilization_rules(config) {
            let values = metrics.recent_values(component, metric_type, window);
            if values.len() < window || !values.iter().all(|v| *v > threshold) {
                continue;
            }
            let Some(observed) = mean(&values) else {
                continue;
            };
            found.push(Candidate {
                bottleneck_type,
                metric_type,
                observed_value: observed,
                threshold,
                severity: utilization_severity(observed),
            });
        }

        for (metric_type, bottleneck_type) in [
            (MetricType::Latency, BottleneckType::IoBound),
            (MetricType::QueueWaitTime, BottleneckType::ConcurrencyBound),
        ] {
            let Some(observed) = metrics.mean(component, metric_type, window) else {
                continue;
            };
            if observed > config.latency_threshold_ms {
                found.push(Candidate {
                    bottleneck_type,
                    metric_type,
                    observed_value: observed,
                    threshold: config.latency_threshold_ms,
                    severity: latency_severity(observed, config.latency_severity_ceiling_ms),
                });
            }
        }

        if let (Some(baseline), Some(recent)) = (
            metrics.baseline(component, MetricType::ExecutionTime),
            metrics.mean(component, MetricType::ExecutionTime, window),
        ) {
            if baseline.value > 0.0 {
                let ratio = recent / baseline.value;
                if ratio > config.execution_time_degradation_ratio {
                    found.push(Candidate {
                        bottleneck_type: BottleneckType::AlgorithmBound,
                        metric_type: MetricType::ExecutionTime,
                        observed_value: recent,
                        threshold: baseline.value * config.execution_time_degradation_ratio,
                        severity: degradation_severity(ratio),
                    });
                }
            }
        }

        found
    }

    /// Scored detections for `component`, excluding any still in cooldown
    pub fn detect(&self, metrics: &MetricsStore, component: &str) -> Vec<BottleneckDetection> {
        let candidates = self.candidates(metrics, component);
        if candidates.is_empty() {
            return Vec::new();
        }

        let success_rate = metrics.success_rate(component);
        let cooldown = Duration::from_secs(self.config.detection_cooldown_secs);
        let now = Instant::now();
        let mut last_emitted = self.last_emitted.lock();

        candidates
            .into_iter()
            .filter_map(|candidate| {
                let key = (component.to_string(), candidate.bottleneck_type);
                if let Some(previous) = last_emitted.get(&key) {
                    if now.duration_since(*previous) < cooldown {
                        return None;
                    }
                }
                last_emitted.insert(key, now);

                let job_id = metrics
                    .recent(component, candidate.metric_type, 1)
                    .last()
                    .and_then(|m| m.job_id);
                let bottleneck_type = candidate.bottleneck_type;
                Some(BottleneckDetection {
                    id: Uuid::new_v4(),
                    bottleneck_type,
                    component: component.to_string(),
                    job_id,
                    severity: candidate.severity,
                    impact_score: impact_score(
                        candidate.severity,
                        bottleneck_type,
                        success_rate,
                        &self.config,
                    ),
                    metric_type: candidate.metric_type,
                    observed_value: candidate.observed_value,
                    threshold: candidate.threshold,
                    resolution_suggestions: bottleneck_type.resolution_suggestions(),
                    estimated_improvement: candidate.severity
                        * bottleneck_type.improvement_potential(),
                    detected_at: Utc::now(),
                })
            })
            .collect()
    }

    /// Forget cooldown entries older than the cooldown itself
    pub fn prune_cooldowns(&self) -> usize {
        let cooldown = Duration::from_secs(self.config.detection_cooldown_secs);
        let mut last_emitted = self.last_emitted.lock();
        let before = last_emitted.len();
        last_emitted.retain(|_, at| at.elapsed() < cooldown);
        before - last_emitted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;

    fn store() -> MetricsStore {
        MetricsStore::new(MetricsConfig::default())
    }

    #[test]
    fn sustained_cpu_is_cpu_bound() {
        let metrics = store();
        for _ in 0..5 {
            metrics.record_value("scan", MetricType::CpuUtilization, 95.0);
        }
        let detector = BottleneckDetector::new(MonitoringConfig::default());
        let found = detector.detect(&metrics, "scan");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bottleneck_type, BottleneckType::CpuBound);
        assert!(found[0].severity >= 0.95);
        assert!((found[0].impact_score - 0.95 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn single_spike_is_ignored() {
        let metrics = store();
        metrics.record_value("scan", MetricType::CpuUtilization, 50.0);
        metrics.record_value("scan", MetricType::CpuUtilization, 50.0);
        metrics.record_value("scan", MetricType::CpuUtilization, 99.0);
        let detector = BottleneckDetector::new(MonitoringConfig::default());
        assert!(detector.detect(&metrics, "scan").is_empty());
    }

    #[test]
    fn latency_maps_to_io_bound() {
        let metrics = store();
        metrics.record_value("scan", MetricType::Latency, 2500.0);
        let detector = BottleneckDetector::new(MonitoringConfig::default());
        let found = detector.detect(&metrics, "scan");
        assert_eq!(found[0].bottleneck_type, BottleneckType::IoBound);
        assert!((found[0].severity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn degraded_execution_time_is_algorithm_bound() {
        let metrics = store();
        for _ in 0..10 {
            metrics.record_value("scan", MetricType::ExecutionTime, 100.0);
        }
        metrics.refresh_baselines();
        for _ in 0..3 {
            metrics.record_value("scan", MetricType::ExecutionTime, 300.0);
        }
        let detector = BottleneckDetector::new(MonitoringConfig::default());
        let found = detector.detect(&metrics, "scan");
        assert_eq!(found[0].bottleneck_type, BottleneckType::AlgorithmBound);
        assert!((found[0].severity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unreliable_component_amplifies_impact() {
        let config = MonitoringConfig::default();
        let stable = impact_score(0.5, BottleneckType::IoBound, Some(0.99), &config);
        let flaky = impact_score(0.5, BottleneckType::IoBound, Some(0.5), &config);
        assert!((flaky - stable * 1.2).abs() < 1e-9);
        assert_eq!(impact_score(1.0, BottleneckType::AlgorithmBound, Some(0.1), &config), 1.0);
    }

    #[test]
    fn cooldown_suppresses_repeats() {
        let metrics = store();
        for _ in 0..3 {
            metrics.record_value("pool:cpu", MetricType::CpuUtilization, 90.0);
        }
        let detector = BottleneckDetector::new(MonitoringConfig::default());
        assert_eq!(detector.detect(&metrics, "pool:cpu").len(), 1);
        assert!(detector.detect(&metrics, "pool:cpu").is_empty());
    }
}
