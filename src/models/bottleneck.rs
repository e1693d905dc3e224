use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::performance::MetricType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckType {
    CpuBound,
    MemoryBound,
    IoBound,
    NetworkBound,
    DatabaseBound,
    ConcurrencyBound,
    AlgorithmBound,
    CoordinationBound,
}

impl BottleneckType {
    pub const ALL: [BottleneckType; 8] = [
        Self::CpuBound,
        Self::MemoryBound,
        Self::IoBound,
        Self::NetworkBound,
        Self::DatabaseBound,
        Self::ConcurrencyBound,
        Self::AlgorithmBound,
        Self::CoordinationBound,
    ];

    /// Fixed weight used in `impact_score`
    pub fn type_weight(&self) -> f64 {
        match self {
            Self::CpuBound => 0.8,
            Self::MemoryBound => 0.7,
            Self::IoBound => 0.9,
            Self::NetworkBound => 0.6,
            Self::DatabaseBound => 0.85,
            Self::ConcurrencyBound => 0.75,
            Self::AlgorithmBound => 0.95,
            Self::CoordinationBound => 0.65,
        }
    }

    /// Upper bound on the improvement resolving this bottleneck can bring
    pub fn improvement_potential(&self) -> f64 {
        match self {
            Self::CpuBound => 0.4,
            Self::MemoryBound => 0.35,
            Self::IoBound => 0.5,
            Self::NetworkBound => 0.3,
            Self::DatabaseBound => 0.45,
            Self::ConcurrencyBound => 0.35,
            Self::AlgorithmBound => 0.6,
            Self::CoordinationBound => 0.25,
        }
    }

    pub fn resolution_suggestions(&self) -> Vec<String> {
        let suggestions: &[&str] = match self {
            Self::CpuBound => &[
                "Parallelize scan work across more workers",
                "Profile hot loops in the scan algorithm",
                "Sample large tables instead of full scans",
            ],
            Self::MemoryBound => &[
                "Stream rows instead of materializing batches",
                "Reduce concurrent scans sharing the memory pool",
                "Increase the memory pool capacity",
            ],
            Self::IoBound => &[
                "Switch to async I/O with connection pooling",
                "Cache catalog metadata between scans",
                "Read columns selectively",
            ],
            Self::NetworkBound => &[
                "Compress transfers between scanner and source",
                "Throttle concurrent transfers per data source",
            ],
            Self::DatabaseBound => &[
                "Increase the database connection pool",
                "Batch metadata queries",
                "Add indexes for scan predicates",
            ],
            Self::ConcurrencyBound => &[
                "Raise the concurrent scan limit",
                "Balance scans across data sources",
            ],
            Self::AlgorithmBound => &[
                "Use incremental scanning against the last checkpoint",
                "Replace quadratic classification passes",
            ],
            Self::CoordinationBound => &[
                "Serialize dependent steps strictly by the dependency graph",
                "Reduce cross-step synchronization points",
            ],
        };
        suggestions.iter().map(|s| s.to_string()).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuBound => "cpu_bound",
            Self::MemoryBound => "memory_bound",
            Self::IoBound => "io_bound",
            Self::NetworkBound => "network_bound",
            Self::DatabaseBound => "database_bound",
            Self::ConcurrencyBound => "concurrency_bound",
            Self::AlgorithmBound => "algorithm_bound",
            Self::CoordinationBound => "coordination_bound",
        }
    }
}

impl fmt::Display for BottleneckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected bottleneck; referenced, never mutated, by the recommender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckDetection {
    pub id: Uuid,
    pub bottleneck_type: BottleneckType,
    pub component: String,
    pub job_id: Option<Uuid>,
    /// In [0,1]
    pub severity: f64,
    /// In [0,1]
    pub impact_score: f64,
    pub metric_type: MetricType,
    pub observed_value: f64,
    pub threshold: f64,
    pub resolution_suggestions: Vec<String>,
    pub estimated_improvement: f64,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_match_table() {
        assert_eq!(BottleneckType::CpuBound.type_weight(), 0.8);
        assert_eq!(BottleneckType::IoBound.type_weight(), 0.9);
        assert_eq!(BottleneckType::AlgorithmBound.type_weight(), 0.95);
        assert_eq!(BottleneckType::CoordinationBound.type_weight(), 0.65);
    }

    #[test]
    fn every_type_has_suggestions() {
        for kind in BottleneckType::ALL {
            assert!(!kind.resolution_suggestions().is_empty(), "{kind}");
            assert!(kind.type_weight() > 0.0 && kind.type_weight() <= 1.0);
        }
    }
}
