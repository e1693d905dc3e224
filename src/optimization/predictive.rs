//! Trend-based degradation prediction.
//!
//! Compares the mean of the most recent window of samples with the window
//! before it. For metrics where lower is better, a rising mean is degradation;
//! for throughput and quality a falling mean is.

use crate::metrics::{mean, MetricsStore};
use crate::models::MetricType;
use serde::{Deserialize, Serialize};

/// Metrics watched for degrading trends
pub const WATCHED_METRICS: [MetricType; 3] = [
    MetricType::ExecutionTime,
    MetricType::Latency,
    MetricType::QueueWaitTime,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationForecast {
    pub component: String,
    pub metric_type: MetricType,
    pub earlier_mean: f64,
    pub recent_mean: f64,
    /// Relative worsening in [0,1]
    pub risk: f64,
}

/// Relative worsening from `earlier` to `recent`, clamped to [0,1]
pub fn degradation_risk(earlier: f64, recent: f64, metric_type: MetricType) -> f64 {
    if earlier.abs() < f64::EPSILON {
        return 0.0;
    }
    let change = (recent - earlier) / earlier.abs();
    let worsening = if metric_type.lower_is_better() {
        change
    } else {
        -change
    };
    worsening.clamp(0.0, 1.0)
}

/// Forecast over the last `2 × window` samples; `None` with too few samples
pub fn forecast(values: &[f64], window: usize, metric_type: MetricType) -> Option<(f64, f64, f64)> {
    let window = window.max(1);
    if values.len() < window * 2 {
        return None;
    }
    let tail = &values[values.len() - window * 2..];
    let earlier = mean(&tail[..window])?;
    let recent = mean(&tail[window..])?;
    Some((earlier, recent, degradation_risk(earlier, recent, metric_type)))
}

#[derive(Debug, Clone)]
pub struct PredictiveAnalyzer {
    window: usize,
    risk_threshold: f64,
}

impl PredictiveAnalyzer {
    pub fn new(window: usize, risk_threshold: f64) -> Self {
        Self {
            window: window.max(1),
            risk_threshold,
        }
    }

    /// Series whose degradation risk exceeds the threshold
    pub fn analyze(&self, metrics: &MetricsStore) -> Vec<DegradationForecast> {
        metrics
            .series_keys()
            .into_iter()
            .filter(|(_, metric_type)| WATCHED_METRICS.contains(metric_type))
            .filter_map(|(component, metric_type)| {
                let values = metrics.recent_values(&component, metric_type, self.window * 2);
                let (earlier_mean, recent_mean, risk) = forecast(&values, self.window, metric_type)?;
                (risk > self.risk_threshold).then_some(DegradationForecast {
                    component,
                    metric_type,
                    earlier_mean,
                    recent_mean,
                    risk,
                })
            })
            .collect()
    }
}
