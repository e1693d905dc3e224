//! # System Constants
//!
//! Lifecycle event names published on the [`EventPublisher`](crate::events::EventPublisher)
//! and the fixed heuristic tables shared by the detector and the recommender.

use crate::models::{ImplementationComplexity, RiskLevel};

/// Lifecycle events published by the orchestration core
pub mod events {
    // Job lifecycle events
    pub const JOB_CREATED: &str = "job.created";
    pub const JOB_PLANNING: &str = "job.planning";
    pub const JOB_PLAN_FAILED: &str = "job.plan_failed";
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_PAUSED: &str = "job.paused";
    pub const JOB_RESUMED: &str = "job.resumed";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_FAILED: &str = "job.failed";
    pub const JOB_CANCELLED: &str = "job.cancelled";
    pub const JOB_TIMED_OUT: &str = "job.timed_out";
    pub const JOB_RECONFIGURED: &str = "job.reconfigured";

    // Step lifecycle events
    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
    pub const STEP_RETRYING: &str = "step.retrying";
    pub const STEP_SKIPPED: &str = "step.skipped";

    // Allocator events
    pub const ALLOCATION_GRANTED: &str = "allocation.granted";
    pub const ALLOCATION_QUEUED: &str = "allocation.queued";
    pub const ALLOCATION_REJECTED: &str = "allocation.rejected";
    pub const ALLOCATION_RELEASED: &str = "allocation.released";
    pub const POOL_RESIZED: &str = "allocation.pool_resized";

    // Monitoring events
    pub const BOTTLENECK_DETECTED: &str = "bottleneck.detected";

    // Optimization events
    pub const RECOMMENDATION_CREATED: &str = "optimization.recommended";
    pub const OPTIMIZATION_AWAITING_APPROVAL: &str = "optimization.awaiting_approval";
    pub const OPTIMIZATION_STATUS_CHANGED: &str = "optimization.status_changed";
    pub const OPTIMIZATION_COMPLETED: &str = "optimization.completed";
    pub const OPTIMIZATION_FAILED: &str = "optimization.failed";
    pub const OPTIMIZATION_REJECTED: &str = "optimization.rejected";
}

/// Ranking factors
pub mod ranking {
    /// Hours of effort at which `effortFactor` bottoms out
    pub const EFFORT_HORIZON_HOURS: f64 = 40.0;
    pub const MIN_EFFORT_FACTOR: f64 = 0.1;
    /// Soft-constraint penalty when effort exceeds the caller's max
    pub const EFFORT_CONSTRAINT_PENALTY: f64 = 0.5;
    /// Soft-constraint penalty when risk is outside the accepted set
    pub const RISK_CONSTRAINT_PENALTY: f64 = 0.3;
}

/// Usage efficiency below which a pool yields a `resource_efficiency` recommendation
pub const LOW_EFFICIENCY_THRESHOLD: f64 = 0.5;

/// Prefix of metrics components that describe a resource pool
pub const POOL_COMPONENT_PREFIX: &str = "pool:";

pub fn complexity_factor(complexity: ImplementationComplexity) -> f64 {
    match complexity {
        ImplementationComplexity::Low => 1.0,
        ImplementationComplexity::Medium => 0.8,
        ImplementationComplexity::High => 0.6,
    }
}

pub fn risk_factor(risk: RiskLevel) -> f64 {
    match risk {
        RiskLevel::Low => 1.0,
        RiskLevel::Medium => 0.7,
        RiskLevel::High => 0.4,
    }
}

/// Metrics component label for a resource pool
pub fn pool_component(pool_id: &str) -> String {
    format!("{POOL_COMPONENT_PREFIX}{pool_id}")
}
