use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kinds of performance samples pushed into the metrics store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Percent
    CpuUtilization,
    /// Percent
    MemoryUtilization,
    /// Percent
    NetworkUtilization,
    /// Percent of the connection pool in use
    DbConnectionUtilization,
    /// Percent
    StorageUtilization,
    /// Milliseconds
    Latency,
    /// Milliseconds
    ExecutionTime,
    /// Milliseconds spent waiting for a dispatch slot or allocation
    QueueWaitTime,
    /// Items per second
    Throughput,
    /// Fraction in [0,1]
    ErrorRate,
    /// Fraction in [0,1]
    QualityScore,
}

impl MetricType {
    /// Whether a drop in value counts as an improvement
    pub fn lower_is_better(&self) -> bool {
        !matches!(self, Self::Throughput | Self::QualityScore)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuUtilization => "cpu_utilization",
            Self::MemoryUtilization => "memory_utilization",
            Self::NetworkUtilization => "network_utilization",
            Self::DbConnectionUtilization => "db_connection_utilization",
            Self::StorageUtilization => "storage_utilization",
            Self::Latency => "latency",
            Self::ExecutionTime => "execution_time",
            Self::QueueWaitTime => "queue_wait_time",
            Self::Throughput => "throughput",
            Self::ErrorRate => "error_rate",
            Self::QualityScore => "quality_score",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable performance sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub metric_type: MetricType,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub job_id: Option<Uuid>,
    pub step_id: Option<String>,
    pub component: String,
}

impl PerformanceMetric {
    pub fn new(component: impl Into<String>, metric_type: MetricType, value: f64) -> Self {
        Self {
            metric_type,
            value,
            timestamp: Utc::now(),
            job_id: None,
            step_id: None,
            component: component.into(),
        }
    }

    pub fn for_step(mut self, job_id: Uuid, step_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id);
        self.step_id = Some(step_id.into());
        self
    }

    pub fn for_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Rolling reference value (median) per component and metric type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBaseline {
    pub component: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub sample_count: usize,
    pub computed_at: DateTime<Utc>,
}
