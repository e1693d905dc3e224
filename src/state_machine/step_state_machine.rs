use super::{
    errors::{invalid_transition, StateMachineError, StateMachineResult},
    events::StepEvent,
    states::StepState,
};

/// Transition table for workflow steps
///
/// `queued → initializing → running → (waiting) → completed | failed | skipped | retrying`
#[derive(Debug, Clone, Copy, Default)]
pub struct StepStateMachine;

impl StepStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: StepState,
        event: &StepEvent,
    ) -> StateMachineResult<StepState> {
        if current_state.is_terminal() {
            return Err(StateMachineError::TerminalState {
                state: current_state.to_string(),
            });
        }

        let target = match (current_state, event) {
            (StepState::Queued, StepEvent::Initialize) => StepState::Initializing,
            (StepState::Queued | StepState::Initializing, StepEvent::WaitForDependencies) => {
                StepState::Waiting
            }
            (StepState::Waiting, StepEvent::DependenciesMet) => StepState::Queued,

            (StepState::Initializing, StepEvent::Start) => StepState::Running,
            (StepState::Running, StepEvent::Complete) => StepState::Completed,

            (StepState::Initializing | StepState::Running, StepEvent::Fail(_)) => StepState::Failed,
            (StepState::Initializing | StepState::Running, StepEvent::RetryAfterFailure(_)) => {
                StepState::Retrying
            }
            (StepState::Retrying, StepEvent::Requeue) => StepState::Queued,
            // Retry budget exhausted while waiting for backoff (e.g. job aborted)
            (StepState::Retrying, StepEvent::Fail(_)) => StepState::Failed,

            // Skip from any non-terminal state
            (_, StepEvent::Skip(_)) => StepState::Skipped,

            (from, event) => return Err(invalid_transition(from, event.event_type())),
        };

        Ok(target)
    }

    pub fn can_transition(current_state: StepState, event: &StepEvent) -> bool {
        Self::determine_target_state(current_state, event).is_ok()
    }
}
