use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use super::job::ResourceRequirement;
use crate::state_machine::StepState;

/// Kind of work a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    #[default]
    Scan,
    Validation,
    Enrichment,
    Notification,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Validation => "validation",
            Self::Enrichment => "enrichment",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens once a step has failed for good
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    /// Abort the parent job immediately, regardless of its failure threshold
    Stop,
    /// Mark the step failed; independent branches keep running
    #[default]
    Continue,
    /// Re-queue up to `max_retries` (also for permanent errors)
    Retry,
    /// Treat the step as optional: mark it skipped along with every dependent
    Skip,
}

/// Predicate over the job context and sibling step statuses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepCondition {
    Always,
    Never,
    ContextEquals { key: String, value: Value },
    ContextExists { key: String },
    StepStatus { step: String, status: StepState },
    Not { condition: Box<StepCondition> },
    All { conditions: Vec<StepCondition> },
    Any { conditions: Vec<StepCondition> },
}

/// Step declaration inside a job spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub step_type: StepType,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub parent_step: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub execution_condition: Option<StepCondition>,
    #[serde(default)]
    pub skip_condition: Option<StepCondition>,
    #[serde(default)]
    pub on_failure: FailureAction,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_seconds: Option<u64>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub resources: Vec<ResourceRequirement>,
}

impl StepSpec {
    pub fn new(id: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            name: None,
            step_type,
            order: 0,
            parent_step: None,
            depends_on: Vec::new(),
            execution_condition: None,
            skip_condition: None,
            on_failure: FailureAction::default(),
            max_retries: None,
            retry_delay_seconds: None,
            priority: 0,
            timeout_seconds: None,
            target: None,
            resources: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn on_failure(mut self, action: FailureAction) -> Self {
        self.on_failure = action;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay_seconds: u64) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay_seconds = Some(retry_delay_seconds);
        self
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_step = Some(parent.into());
        self
    }

    pub fn skip_when(mut self, condition: StepCondition) -> Self {
        self.skip_condition = Some(condition);
        self
    }

    pub fn execute_when(mut self, condition: StepCondition) -> Self {
        self.execution_condition = Some(condition);
        self
    }

    pub fn with_resource(mut self, requirement: ResourceRequirement) -> Self {
        self.resources.push(requirement);
        self
    }
}

/// Resource consumption observed during one step attempt
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsageSample {
    /// Percent of the allotted CPU
    pub cpu_utilization: f64,
    /// Percent of the allotted memory
    pub memory_utilization: f64,
    pub network_io_bytes: u64,
    pub storage_io_bytes: u64,
    /// Average I/O latency observed by the handler
    pub latency_ms: Option<f64>,
}

/// Workflow step record; mutated by the step executor path of the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step id as declared in the job spec, unique within its job
    pub id: String,
    pub job_id: Uuid,
    pub step_name: String,
    pub step_type: StepType,
    pub order: u32,
    pub parent_step: Option<String>,
    pub dependency_requirements: BTreeSet<String>,
    pub execution_condition: Option<StepCondition>,
    pub skip_condition: Option<StepCondition>,
    pub on_failure_action: FailureAction,
    pub status: StepState,
    pub attempts: u32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub priority: i32,
    pub timeout_seconds: Option<u64>,
    pub target: Option<String>,
    pub resources: Vec<ResourceRequirement>,
    pub resource_usage: Vec<ResourceUsageSample>,
    pub quality_score: Option<f64>,
    pub result: Option<Value>,
    pub last_error: Option<String>,
    pub skip_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    pub fn from_spec(
        job_id: Uuid,
        spec: &StepSpec,
        default_max_retries: u32,
        default_retry_delay_seconds: u64,
    ) -> Self {
        Self {
            id: spec.id.clone(),
            job_id,
            step_name: spec.name.clone().unwrap_or_else(|| spec.id.clone()),
            step_type: spec.step_type,
            order: spec.order,
            parent_step: spec.parent_step.clone(),
            dependency_requirements: spec.depends_on.iter().cloned().collect(),
            execution_condition: spec.execution_condition.clone(),
            skip_condition: spec.skip_condition.clone(),
            on_failure_action: spec.on_failure,
            status: StepState::Queued,
            attempts: 0,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            retry_delay_seconds: spec.retry_delay_seconds.unwrap_or(default_retry_delay_seconds),
            priority: spec.priority,
            timeout_seconds: spec.timeout_seconds,
            target: spec.target.clone(),
            resources: spec.resources.clone(),
            resource_usage: Vec::new(),
            quality_score: None,
            result: None,
            last_error: None,
            skip_reason: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Component label used for metrics and bottleneck attribution
    pub fn component(&self) -> String {
        self.step_type.as_str().to_string()
    }

    pub fn has_retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_flow_into_step() {
        let spec = StepSpec::new("scan_orders", StepType::Scan).depends_on(["resolve"]);
        let step = WorkflowStep::from_spec(Uuid::new_v4(), &spec, 3, 5);
        assert_eq!(step.step_name, "scan_orders");
        assert_eq!(step.max_retries, 3);
        assert_eq!(step.retry_delay_seconds, 5);
        assert_eq!(step.status, StepState::Queued);
        assert!(step.dependency_requirements.contains("resolve"));
    }

    #[test]
    fn condition_serde_shape() {
        let condition = StepCondition::ContextEquals {
            key: "mode".into(),
            value: Value::from("full"),
        };
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["kind"], "context_equals");
        let back: StepCondition = serde_json::from_value(json).unwrap();
        assert_eq!(back, condition);
    }
}
