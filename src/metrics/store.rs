use crate::config::MetricsConfig;
use crate::models::{MetricType, PerformanceBaseline, PerformanceMetric};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

type SeriesKey = (String, MetricType);

/// Rolling windows of performance samples and per-component baselines
///
/// Samples are appended only; each (component, metric type) series keeps at
/// most `window_capacity` entries. Readers take short read locks on a single
/// series and never block writers of other series.
#[derive(Debug)]
pub struct MetricsStore {
    config: MetricsConfig,
    series: DashMap<SeriesKey, RwLock<VecDeque<PerformanceMetric>>>,
    outcomes: DashMap<String, RwLock<VecDeque<bool>>>,
    baselines: DashMap<SeriesKey, PerformanceBaseline>,
    total_samples: AtomicU64,
}

impl MetricsStore {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            series: DashMap::new(),
            outcomes: DashMap::new(),
            baselines: DashMap::new(),
            total_samples: AtomicU64::new(0),
        }
    }

    /// Append a sample, evicting the oldest once the window is full
    pub fn record(&self, metric: PerformanceMetric) {
        let key = (metric.component.clone(), metric.metric_type);
        match self.series.get(&key) {
            Some(entry) => self.push_bounded(&entry, metric),
            None => {
                let entry = self
                    .series
                    .entry(key)
                    .or_insert_with(|| RwLock::new(VecDeque::with_capacity(64)));
                self.push_bounded(&entry, metric);
            }
        }
        self.total_samples.fetch_add(1, Ordering::Relaxed);
    }

    fn push_bounded(&self, series: &RwLock<VecDeque<PerformanceMetric>>, metric: PerformanceMetric) {
        let mut window = series.write();
        if window.len() >= self.config.window_capacity {
            window.pop_front();
        }
        window.push_back(metric);
    }

    pub fn record_value(&self, component: &str, metric_type: MetricType, value: f64) {
        self.record(PerformanceMetric::new(component, metric_type, value));
    }

    /// Record a step outcome used for the component's success rate
    pub fn record_outcome(&self, component: &str, success: bool) {
        let entry = self
            .outcomes
            .entry(component.to_string())
            .or_insert_with(|| RwLock::new(VecDeque::new()));
        let mut window = entry.write();
        if window.len() >= self.config.outcome_window {
            window.pop_front();
        }
        window.push_back(success);
    }

    /// Fraction of successful outcomes in the retained window
    pub fn success_rate(&self, component: &str) -> Option<f64> {
        let entry = self.outcomes.get(component)?;
        let window = entry.read();
        if window.is_empty() {
            return None;
        }
        let successes = window.iter().filter(|ok| **ok).count();
        Some(successes as f64 / window.len() as f64)
    }

    /// Success rate across every component
    pub fn overall_success_rate(&self) -> Option<f64> {
        let (successes, total) = self.outcomes.iter().fold((0usize, 0usize), |acc, entry| {
            let window = entry.value().read();
            (
                acc.0 + window.iter().filter(|ok| **ok).count(),
                acc.1 + window.len(),
            )
        });
        (total > 0).then(|| successes as f64 / total as f64)
    }

    /// Up to `limit` most recent samples, oldest first
    pub fn recent(&self, component: &str, metric_type: MetricType, limit: usize) -> Vec<PerformanceMetric> {
        let key = (component.to_string(), metric_type);
        self.series
            .get(&key)
            .map(|entry| {
                let window = entry.read();
                let skip = window.len().saturating_sub(limit);
                window.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn recent_values(&self, component: &str, metric_type: MetricType, limit: usize) -> Vec<f64> {
        self.recent(component, metric_type, limit)
            .into_iter()
            .map(|m| m.value)
            .collect()
    }

    /// Samples recorded at or after `since`, oldest first
    pub fn samples_since(
        &self,
        component: &str,
        metric_type: MetricType,
        since: DateTime<Utc>,
    ) -> Vec<PerformanceMetric> {
        let key = (component.to_string(), metric_type);
        self.series
            .get(&key)
            .map(|entry| {
                entry
                    .read()
                    .iter()
                    .filter(|m| m.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mean of the `limit` most recent samples
    pub fn mean(&self, component: &str, metric_type: MetricType, limit: usize) -> Option<f64> {
        mean(&self.recent_values(component, metric_type, limit))
    }

    pub fn sample_count(&self, component: &str, metric_type: MetricType) -> usize {
        self.series
            .get(&(component.to_string(), metric_type))
            .map(|entry| entry.read().len())
            .unwrap_or(0)
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples.load(Ordering::Relaxed)
    }

    /// Every series currently held, sorted for deterministic iteration
    pub fn series_keys(&self) -> Vec<(String, MetricType)> {
        let mut keys: Vec<_> = self.series.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Recompute the median baseline of every series; returns the number refreshed
    pub fn refresh_baselines(&self) -> usize {
        let mut refreshed = 0;
        for (component, metric_type) in self.series_keys() {
            let mut values = self.recent_values(&component, metric_type, self.config.baseline_window);
            let sample_count = values.len();
            if let Some(value) = median(&mut values) {
                self.baselines.insert(
                    (component.clone(), metric_type),
                    PerformanceBaseline {
                        component,
                        metric_type,
                        value,
                        sample_count,
                        computed_at: Utc::now(),
                    },
                );
                refreshed += 1;
            }
        }
        debug!(refreshed, "📊 METRICS: Baselines refreshed");
        refreshed
    }

    pub fn baseline(&self, component: &str, metric_type: MetricType) -> Option<PerformanceBaseline> {
        self.baselines
            .get(&(component.to_string(), metric_type))
            .map(|b| b.clone())
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Median of the values; sorts in place
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
