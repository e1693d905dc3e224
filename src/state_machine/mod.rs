//! # State Machines
//!
//! Pure transition tables for orchestration jobs and workflow steps. The job
//! controller owns the records and applies transitions; these types only decide
//! whether a transition is legal and where it leads.

pub mod errors;
pub mod events;
pub mod job_state_machine;
pub mod states;
pub mod step_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::{JobEvent, StepEvent};
pub use job_state_machine::JobStateMachine;
pub use states::{JobState, StepState};
pub use step_state_machine::StepStateMachine;
