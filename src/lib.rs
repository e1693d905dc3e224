#![allow(clippy::doc_markdown)] // Allow technical terms like TOML, JSON in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Scanflow Core
//!
//! Orchestration job controller and adaptive performance optimizer for large
//! fleets of data-scan jobs.
//!
//! ## Overview
//!
//! A scan job is a set of workflow steps (scans, validations, enrichments,
//! notifications) over a list of data-source targets. The controller plans the
//! steps into a dependency graph, schedules ready steps under the job's
//! orchestration strategy, reserves pool resources for the job, retries
//! failures with exponential backoff and drives the job to a terminal state.
//!
//! Alongside it, the performance monitor samples pool utilization and step
//! metrics, detects bottlenecks, and hands them to the optimization
//! recommender, which ranks catalog recommendations, applies low-risk ones
//! through controller directives, measures the effect and rolls back changes
//! that make things worse.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Job controller, planner, strategies, directives, bootstrap
//! - [`monitoring`] - Tiered sampling and bottleneck detection
//! - [`optimization`] - Recommendation catalog, ranking, prediction, execution
//! - [`resources`] - Pool-based resource allocator
//! - [`metrics`] - In-memory time series, success rates and baselines
//! - [`state_machine`] - Job and step state machines
//! - [`models`] - Jobs, steps, allocations, detections, recommendations
//! - [`registry`] - Step handler registry
//! - [`services`] - Collaborator traits with in-memory implementations
//! - [`config`] - Layered configuration
//! - [`events`] - Broadcast event publisher
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanflow_core::config::ScanflowConfig;
//! use scanflow_core::models::JobSpec;
//! use scanflow_core::orchestration::{OrchestrationBootstrap, ServiceContext};
//!
//! # async fn example() -> scanflow_core::Result<()> {
//! let ctx = ServiceContext::builder(ScanflowConfig::default()).build();
//! let system = OrchestrationBootstrap::bootstrap_with_context(ctx).await?;
//!
//! let job_id = system
//!     .controller()
//!     .submit_job(JobSpec::new("nightly", vec!["pg://warehouse.orders".into()]))
//!     .await?;
//! let job = system.controller().wait_for_completion(job_id, None).await?;
//! println!("job {} finished as {}", job.id, job.status);
//!
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property tests
//! cargo bench --features benchmarks
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod monitoring;
pub mod optimization;
pub mod orchestration;
pub mod registry;
pub mod resources;
pub mod services;
pub mod state_machine;
pub mod validation;

pub use config::{ConfigManager, ScanflowConfig};
pub use error::{FailureKind, Result, ScanflowError, StepExecutionError};
pub use events::EventPublisher;
pub use metrics::MetricsStore;
pub use models::{
    BottleneckDetection, BottleneckType, JobSpec, MetricType, OptimizationRecommendation,
    OptimizationResult, OptimizationStatus, OrchestrationJob, OrchestrationStrategy,
    PerformanceMetric, ResourceType, StepSpec, StepType, WorkflowStep,
};
pub use monitoring::{BottleneckDetector, PerformanceMonitor};
pub use optimization::{OptimizationExecutor, OptimizationRecommender, RankedRecommendation};
pub use orchestration::{
    ControllerDirective, ControllerHandle, JobController, OrchestrationBootstrap,
    OrchestrationSystem, ServiceContext,
};
pub use registry::{HandlerRegistry, StepContext, StepHandler, StepOutput};
pub use resources::{AllocationRequest, ResourceAllocator};
pub use state_machine::{JobState, StepState};
