use super::{
    errors::{invalid_transition, StateMachineError, StateMachineResult},
    events::JobEvent,
    states::JobState,
};

/// Transition table for orchestration jobs
///
/// `pending → planning → executing → (paused) → completed | failed | cancelled | timeout`
#[derive(Debug, Clone, Copy, Default)]
pub struct JobStateMachine;

impl JobStateMachine {
    /// Determine the target state for an event, without side effects
    pub fn determine_target_state(
        current_state: JobState,
        event: &JobEvent,
    ) -> StateMachineResult<JobState> {
        if current_state.is_terminal() {
            return Err(StateMachineError::TerminalState {
                state: current_state.to_string(),
            });
        }

        let target = match (current_state, event) {
            (JobState::Pending, JobEvent::Plan) => JobState::Planning,

            (JobState::Planning, JobEvent::PlanReady) => JobState::Executing,
            (JobState::Planning, JobEvent::PlanFailed(_)) => JobState::Failed,

            (JobState::Executing, JobEvent::Pause) => JobState::Paused,
            (JobState::Paused, JobEvent::Resume) => JobState::Executing,
            // Resuming a job that is already executing is a no-op
            (JobState::Executing, JobEvent::Resume) => JobState::Executing,

            (JobState::Executing, JobEvent::Complete) => JobState::Completed,
            (JobState::Executing | JobState::Paused, JobEvent::Fail(_)) => JobState::Failed,
            (JobState::Planning, JobEvent::Fail(_)) => JobState::Failed,

            (JobState::Planning | JobState::Executing | JobState::Paused, JobEvent::TimedOut) => {
                JobState::Timeout
            }

            // Cancellation from any non-terminal state
            (_, JobEvent::Cancel) => JobState::Cancelled,

            (from, event) => return Err(invalid_transition(from, event.event_type())),
        };

        Ok(target)
    }

    pub fn can_transition(current_state: JobState, event: &JobEvent) -> bool {
        Self::determine_target_state(current_state, event).is_ok()
    }
}
