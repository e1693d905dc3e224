use crate::error::ScanflowError;
use thiserror::Error;

/// Error types for state machine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} via {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Cannot transition from terminal state {state}")]
    TerminalState { state: String },

    #[error("Guard condition failed: {reason}")]
    GuardFailed { reason: String },
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;

pub fn invalid_transition(from: impl ToString, event: &str) -> StateMachineError {
    StateMachineError::InvalidTransition {
        from: from.to_string(),
        event: event.to_string(),
    }
}

/// Helper function to create guard failures
pub fn guard_failed(reason: impl Into<String>) -> StateMachineError {
    StateMachineError::GuardFailed {
        reason: reason.into(),
    }
}

impl From<StateMachineError> for ScanflowError {
    fn from(err: StateMachineError) -> Self {
        ScanflowError::StateTransition(err.to_string())
    }
}
