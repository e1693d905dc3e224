use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Top-level error type for every orchestration and optimization operation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScanflowError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dependency cycle detected among steps: {}", steps.join(" -> "))]
    DependencyCycle { steps: Vec<String> },

    #[error("Resource exhausted in pool {pool_id}: requested {requested}, available {available}")]
    ResourceExhaustion {
        pool_id: String,
        requested: f64,
        available: f64,
    },

    #[error("Step {step_id} failed ({kind}): {message}")]
    StepExecution {
        step_id: String,
        kind: FailureKind,
        message: String,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Optimization apply failed: {0}")]
    OptimizationApply(String),

    #[error("State transition error: {0}")]
    StateTransition(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Shutdown in progress: {0}")]
    Shutdown(String),
}

impl ScanflowError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Short machine-readable cause used in job error logs
    pub fn cause(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::DependencyCycle { .. } => "dependency_cycle",
            Self::ResourceExhaustion { .. } => "resource_exhaustion",
            Self::StepExecution { .. } => "step_execution",
            Self::Timeout(_) => "timeout",
            Self::OptimizationApply(_) => "optimization_apply",
            Self::StateTransition(_) => "state_transition",
            Self::NotFound { .. } => "not_found",
            Self::Configuration(_) => "configuration",
            Self::Repository(_) => "repository",
            Self::Shutdown(_) => "shutdown",
        }
    }
}

impl From<config::ConfigError> for ScanflowError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanflowError>;

/// Classifies a step failure for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Infrastructure hiccup (timeout, connection reset); retried locally
    Transient,
    /// The step cannot succeed as specified; bubbles to the job controller
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Error returned by step handlers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} step failure: {message}")]
pub struct StepExecutionError {
    pub kind: FailureKind,
    pub message: String,
}

impl StepExecutionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }

    pub fn into_scanflow_error(self, step_id: impl Into<String>) -> ScanflowError {
        ScanflowError::StepExecution {
            step_id: step_id.into(),
            kind: self.kind,
            message: self.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_lists_steps_in_order() {
        let err = ScanflowError::DependencyCycle {
            steps: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected among steps: a -> b -> a"
        );
        assert_eq!(err.cause(), "dependency_cycle");
    }

    #[test]
    fn step_error_conversion_keeps_kind() {
        let err = StepExecutionError::transient("connection reset").into_scanflow_error("scan_1");
        match err {
            ScanflowError::StepExecution { step_id, kind, .. } => {
                assert_eq!(step_id, "scan_1");
                assert_eq!(kind, FailureKind::Transient);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
