use serde::{Deserialize, Serialize};

/// Events that can trigger job state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobEvent {
    /// Begin plan construction
    Plan,
    /// Plan built and budget reserved
    PlanReady,
    /// Plan construction failed (cycle, unknown dependency, budget)
    PlanFailed(String),
    Pause,
    Resume,
    /// Every non-skipped step completed
    Complete,
    Fail(String),
    Cancel,
    /// The job exceeded its time budget
    TimedOut,
}

impl JobEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::PlanReady => "plan_ready",
            Self::PlanFailed(_) => "plan_failed",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
            Self::TimedOut => "timed_out",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::PlanFailed(msg) | Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}

/// Events that can trigger workflow step state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StepEvent {
    /// Dependencies satisfied, begin acquiring resources
    Initialize,
    /// Resources held, handler starts
    Start,
    /// At least one dependency is still outstanding
    WaitForDependencies,
    /// Every dependency is completed or skipped
    DependenciesMet,
    Complete,
    /// Terminal failure
    Fail(String),
    /// Failed attempt with retries remaining
    RetryAfterFailure(String),
    /// Backoff elapsed, step goes back to the queue
    Requeue,
    Skip(String),
}

impl StepEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Start => "start",
            Self::WaitForDependencies => "wait_for_dependencies",
            Self::DependenciesMet => "dependencies_met",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::RetryAfterFailure(_) => "retry_after_failure",
            Self::Requeue => "requeue",
            Self::Skip(_) => "skip",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) | Self::RetryAfterFailure(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }

    pub fn skip_because(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }
}
