use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::optimization::OptimizationConstraints;
use super::resource_allocation::ResourceType;
use super::workflow_step::StepSpec;
use crate::state_machine::JobState;

/// How ready steps are admitted and ordered within a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStrategy {
    Sequential,
    Parallel,
    #[default]
    Adaptive,
    PriorityBased,
    ResourceAware,
    DependencyAware,
    LoadBalanced,
}

impl OrchestrationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Adaptive => "adaptive",
            Self::PriorityBased => "priority_based",
            Self::ResourceAware => "resource_aware",
            Self::DependencyAware => "dependency_aware",
            Self::LoadBalanced => "load_balanced",
        }
    }
}

impl fmt::Display for OrchestrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed amount of resource a job or step needs while it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub resource_type: ResourceType,
    pub amount: f64,
    /// Explicit pool; when absent the first configured pool of `resource_type` is used
    #[serde(default)]
    pub pool_id: Option<String>,
}

impl ResourceRequirement {
    pub fn new(resource_type: ResourceType, amount: f64) -> Self {
        Self {
            resource_type,
            amount,
            pool_id: None,
        }
    }

    pub fn in_pool(mut self, pool_id: impl Into<String>) -> Self {
        self.pool_id = Some(pool_id.into());
        self
    }
}

/// Relative importance of optimization goals for a job; weights sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalWeights {
    pub throughput: f64,
    pub latency: f64,
    pub cost: f64,
    pub reliability: f64,
}

impl Default for GoalWeights {
    fn default() -> Self {
        Self {
            throughput: 0.25,
            latency: 0.25,
            cost: 0.25,
            reliability: 0.25,
        }
    }
}

impl GoalWeights {
    pub fn values(&self) -> [(&'static str, f64); 4] {
        [
            ("throughput", self.throughput),
            ("latency", self.latency),
            ("cost", self.cost),
            ("reliability", self.reliability),
        ]
    }

    pub fn total(&self) -> f64 {
        self.values().iter().map(|(_, w)| w).sum()
    }

    /// True when throughput/latency outweigh cost/reliability
    pub fn favors_speed(&self) -> bool {
        self.throughput + self.latency > self.cost + self.reliability
    }
}

/// Job submission as received from callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub strategy: OrchestrationStrategy,
    pub targets: Vec<String>,
    #[serde(default)]
    pub max_concurrent_scans: Option<usize>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub failure_threshold: Option<f64>,
    #[serde(default)]
    pub priority: i32,
    /// Declared steps; empty means one scan step per target
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    /// Budget reserved for the whole job before any step runs
    #[serde(default)]
    pub resource_requirements: Vec<ResourceRequirement>,
    #[serde(default)]
    pub goal_weights: GoalWeights,
    #[serde(default)]
    pub constraints: Option<OptimizationConstraints>,
    /// Free-form context visible to step conditions and handlers
    #[serde(default)]
    pub context: Value,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            name: name.into(),
            strategy: OrchestrationStrategy::default(),
            targets,
            max_concurrent_scans: None,
            timeout_seconds: None,
            failure_threshold: None,
            priority: 0,
            steps: Vec::new(),
            resource_requirements: Vec::new(),
            goal_weights: GoalWeights::default(),
            constraints: None,
            context: Value::Null,
        }
    }

    pub fn with_strategy(mut self, strategy: OrchestrationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_max_concurrent_scans(mut self, max: usize) -> Self {
        self.max_concurrent_scans = Some(max);
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_failure_threshold(mut self, threshold: f64) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_resource(mut self, requirement: ResourceRequirement) -> Self {
        self.resource_requirements.push(requirement);
        self
    }

    pub fn with_goal_weights(mut self, weights: GoalWeights) -> Self {
        self.goal_weights = weights;
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Aggregate step outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResultCounters {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub retried_attempts: usize,
}

impl JobResultCounters {
    pub fn terminal_steps(&self) -> usize {
        self.completed_steps + self.failed_steps + self.skipped_steps
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            self.failed_steps as f64 / self.total_steps as f64
        }
    }
}

/// One entry of a job's ordered error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobErrorEntry {
    pub cause: String,
    pub message: String,
    pub step: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Orchestration job record; mutated only by the job controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationJob {
    pub id: Uuid,
    pub name: String,
    pub strategy: OrchestrationStrategy,
    pub status: JobState,
    pub priority: i32,
    pub targets: Vec<String>,
    pub max_concurrent_scans: usize,
    pub timeout_seconds: u64,
    pub failure_threshold: f64,
    pub progress_percentage: f64,
    pub current_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub results: JobResultCounters,
    pub error_log: Vec<JobErrorEntry>,
    pub resource_requirements: Vec<ResourceRequirement>,
    pub goal_weights: GoalWeights,
    pub constraints: Option<OptimizationConstraints>,
    pub context: Value,
}

impl OrchestrationJob {
    /// Build the pending record for a validated spec; defaults are already resolved
    pub fn from_spec(
        spec: &JobSpec,
        max_concurrent_scans: usize,
        timeout_seconds: u64,
        failure_threshold: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: spec.name.clone(),
            strategy: spec.strategy,
            status: JobState::Pending,
            priority: spec.priority,
            targets: spec.targets.clone(),
            max_concurrent_scans,
            timeout_seconds,
            failure_threshold,
            progress_percentage: 0.0,
            current_step: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            results: JobResultCounters::default(),
            error_log: Vec::new(),
            resource_requirements: spec.resource_requirements.clone(),
            goal_weights: spec.goal_weights,
            constraints: spec.constraints.clone(),
            context: spec.context.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn record_error(&mut self, cause: &str, message: impl Into<String>, step: Option<&str>) {
        self.error_log.push(JobErrorEntry {
            cause: cause.to_string(),
            message: message.into(),
            step: step.map(str::to_string),
            timestamp: Utc::now(),
        });
    }

    pub fn refresh_progress(&mut self) {
        self.progress_percentage = if self.results.total_steps == 0 {
            0.0
        } else {
            self.results.terminal_steps() as f64 / self.results.total_steps as f64 * 100.0
        };
    }
}
