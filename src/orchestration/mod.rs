//! # Orchestration Engine
//!
//! Job lifecycle management for scan jobs: planning, scheduling, step
//! execution with retries, resource reservation and runtime tuning.
//!
//! ## Core Components
//!
//! - **JobController**: accepts job specs, drives each job on its own task and
//!   applies directives from the optimizer
//! - **Planner**: dependency graph validation, cycle detection and topological levels
//! - **Strategies**: one [`SchedulingStrategy`] per orchestration strategy, plus
//!   the adaptive selector
//! - **StepExecutor**: one attempt of one step with timeout and panic isolation
//! - **Conditions**: `skip_when` / `execute_when` evaluation against job context
//! - **Directives**: the bounded channel the optimizer uses to tune running jobs
//! - **Bootstrap**: wires controller, monitor and recommender into one system

pub mod bootstrap;
pub mod conditions;
pub mod context;
pub mod directives;
pub mod job_controller;
pub mod planner;
pub mod step_executor;
pub mod strategy;

pub use bootstrap::{BootstrapConfig, OrchestrationBootstrap, OrchestrationSystem, SystemStatus};
pub use context::{ServiceContext, ServiceContextBuilder};
pub use directives::{directive_channel, ControllerDirective, ControllerHandle, DirectiveEnvelope};
pub use job_controller::JobController;
pub use planner::{build_plan, is_valid_start_order, step_specs_for, ExecutionPlan, PlanOutcome};
pub use step_executor::{AttemptInput, AttemptOutcome, StepExecutor};
pub use strategy::{strategy_for, AdaptiveStrategy, ReadyStep, SchedulingContext, SchedulingStrategy};
