//! # Registry Infrastructure
//!
//! Step handlers and the registry that resolves them per step id or step type.

pub mod handler_registry;
pub mod step_handler;

pub use handler_registry::{HandlerKey, HandlerRegistry};
pub use step_handler::{PassthroughHandler, StepContext, StepHandler, StepOutput};
