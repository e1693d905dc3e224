use serde::{Deserialize, Serialize};
use std::fmt;

/// Orchestration job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted but not yet started
    #[default]
    Pending,
    /// Building the dependency graph and reserving the job budget
    Planning,
    /// Steps are being dispatched
    Executing,
    /// Dispatch suspended; running steps drain but nothing new starts
    Paused,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    /// Only paused or executing jobs can be resumed
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Paused | Self::Executing)
    }

    /// Check if this is an active state (job holds or may hold resources)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Planning | Self::Executing | Self::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "planning" => Ok(Self::Planning),
            "executing" => Ok(Self::Executing),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timeout" => Ok(Self::Timeout),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

/// Workflow step lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Created by the planner, eligible for dispatch once dependencies allow
    #[default]
    Queued,
    /// Acquiring resources before the handler runs
    Initializing,
    Running,
    /// Blocked on at least one dependency that is not completed or skipped
    Waiting,
    Completed,
    Failed,
    Skipped,
    /// Failed attempt scheduled for another try after backoff
    Retrying,
}

impl StepState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Check if this is an active state (a handler task exists for the step)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initializing | Self::Running)
    }

    /// Check if this step satisfies dependencies for other steps
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Retrying => "retrying",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "initializing" => Ok(Self::Initializing),
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "retrying" => Ok(Self::Retrying),
            _ => Err(format!("Invalid step state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_terminal_check() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::Timeout.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Planning.is_terminal());
        assert!(!JobState::Executing.is_terminal());
        assert!(!JobState::Paused.is_terminal());
    }

    #[test]
    fn test_only_paused_and_executing_resume() {
        assert!(JobState::Paused.is_resumable());
        assert!(JobState::Executing.is_resumable());
        assert!(!JobState::Pending.is_resumable());
        assert!(!JobState::Completed.is_resumable());
    }

    #[test]
    fn test_step_state_dependency_satisfaction() {
        assert!(StepState::Completed.satisfies_dependencies());
        assert!(StepState::Skipped.satisfies_dependencies());
        assert!(!StepState::Failed.satisfies_dependencies());
        assert!(!StepState::Running.satisfies_dependencies());
        assert!(!StepState::Retrying.satisfies_dependencies());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(JobState::Executing.to_string(), "executing");
        assert_eq!("timeout".parse::<JobState>().unwrap(), JobState::Timeout);
        assert_eq!(StepState::Retrying.to_string(), "retrying");
        assert_eq!("waiting".parse::<StepState>().unwrap(), StepState::Waiting);
        assert!("bogus".parse::<StepState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&JobState::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
        let parsed: JobState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JobState::Paused);
    }
}
