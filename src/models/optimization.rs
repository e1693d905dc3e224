use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::job::OrchestrationStrategy;
use super::performance::MetricType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationType {
    Parallelization,
    AlgorithmOptimization,
    Streaming,
    AsyncIo,
    ConnectionPooling,
    Caching,
    ResourceScaling,
    ResourceEfficiency,
    ConcurrencyTuning,
    StrategyChange,
    Predictive,
}

impl fmt::Display for OptimizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parallelization => "parallelization",
            Self::AlgorithmOptimization => "algorithm_optimization",
            Self::Streaming => "streaming",
            Self::AsyncIo => "async_io",
            Self::ConnectionPooling => "connection_pooling",
            Self::Caching => "caching",
            Self::ResourceScaling => "resource_scaling",
            Self::ResourceEfficiency => "resource_efficiency",
            Self::ConcurrencyTuning => "concurrency_tuning",
            Self::StrategyChange => "strategy_change",
            Self::Predictive => "predictive",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationComplexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Concrete change the job controller or allocator can apply and undo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TuningAction {
    AdjustConcurrency { delta: i32 },
    SwitchStrategy { strategy: OrchestrationStrategy },
    ResizePool { pool_id: String, capacity_factor: f64 },
    /// Documentation-only change; nothing is applied automatically
    Advisory,
}

impl TuningAction {
    pub fn is_advisory(&self) -> bool {
        matches!(self, Self::Advisory)
    }
}

/// Prior values captured when a tuning action was applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackAction {
    RestoreConcurrency {
        per_job: Vec<(Uuid, usize)>,
        default: Option<usize>,
    },
    RestoreStrategy {
        per_job: Vec<(Uuid, OrchestrationStrategy)>,
        /// `Some(previous_override)` when the default for future jobs was changed
        default: Option<Option<OrchestrationStrategy>>,
    },
    RestorePoolCapacity {
        pool_id: String,
        capacity: f64,
    },
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub description: String,
    pub rollback: RollbackAction,
}

impl AppliedChange {
    pub fn nothing(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            rollback: RollbackAction::Nothing,
        }
    }
}

/// A proposed configuration or resource change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub id: Uuid,
    pub optimization_type: OptimizationType,
    pub target_component: String,
    /// Job the change targets; `None` applies to all active jobs and future plans
    pub job_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub expected_improvement: f64,
    pub confidence: f64,
    pub implementation_complexity: ImplementationComplexity,
    pub estimated_effort_hours: f64,
    pub risk_level: RiskLevel,
    pub prerequisites: Vec<String>,
    pub implementation_steps: Vec<String>,
    pub rollback_steps: Vec<String>,
    pub action: TuningAction,
    /// Metric expected to improve; used for before/after snapshots
    pub metric_type: MetricType,
    pub source_bottleneck: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied limits used to filter and weight recommendations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OptimizationConstraints {
    #[serde(default)]
    pub max_effort_hours: Option<f64>,
    #[serde(default)]
    pub acceptable_risk_levels: Option<Vec<RiskLevel>>,
    #[serde(default)]
    pub max_complexity: Option<ImplementationComplexity>,
    #[serde(default)]
    pub min_improvement: Option<f64>,
    #[serde(default)]
    pub enforcement: ConstraintEnforcement,
}

/// `hard` drops violating recommendations; `soft` down-weights effort/risk violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintEnforcement {
    #[default]
    Hard,
    Soft,
}

/// `pending → analyzing → optimizing → testing → applying → completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    AwaitingApproval,
    Pending,
    Analyzing,
    Optimizing,
    Testing,
    Applying,
    Completed,
    Failed,
    Rejected,
}

impl OptimizationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AwaitingApproval => "awaiting_approval",
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Optimizing => "optimizing",
            Self::Testing => "testing",
            Self::Applying => "applying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub component: String,
    pub metric_type: MetricType,
    pub value: Option<f64>,
    pub sample_count: usize,
    pub captured_at: DateTime<Utc>,
}

/// Execution record for one recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub id: Uuid,
    pub recommendation_id: Uuid,
    pub status: OptimizationStatus,
    pub status_history: Vec<(OptimizationStatus, DateTime<Utc>)>,
    pub before: Option<PerformanceSnapshot>,
    pub after: Option<PerformanceSnapshot>,
    pub actual_improvement: Option<f64>,
    pub applied_change: Option<AppliedChange>,
    pub rollback_performed: bool,
    pub residual_side_effects: Vec<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OptimizationResult {
    pub fn new(recommendation_id: Uuid, status: OptimizationStatus) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            recommendation_id,
            status,
            status_history: vec![(status, now)],
            before: None,
            after: None,
            actual_improvement: None,
            applied_change: None,
            rollback_performed: false,
            residual_side_effects: Vec::new(),
            error: None,
            created_at: now,
            completed_at: None,
        }
    }

    pub fn advance(&mut self, status: OptimizationStatus) {
        let now = Utc::now();
        self.status = status;
        self.status_history.push((status, now));
        if status.is_terminal() {
            self.completed_at = Some(now);
        }
    }

    pub fn statuses(&self) -> Vec<OptimizationStatus> {
        self.status_history.iter().map(|(status, _)| *status).collect()
    }
}
