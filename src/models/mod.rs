//! # Data Model
//!
//! Records owned by the orchestration core: jobs and their steps, resource
//! allocations, performance samples and baselines, bottleneck detections, and
//! optimization recommendations with their execution results.

pub mod bottleneck;
pub mod job;
pub mod optimization;
pub mod performance;
pub mod resource_allocation;
pub mod workflow_step;

pub use bottleneck::{BottleneckDetection, BottleneckType};
pub use job::{
    GoalWeights, JobErrorEntry, JobResultCounters, JobSpec, OrchestrationJob,
    OrchestrationStrategy, ResourceRequirement,
};
pub use optimization::{
    AppliedChange, ConstraintEnforcement, ImplementationComplexity, OptimizationConstraints,
    OptimizationRecommendation, OptimizationResult, OptimizationStatus, OptimizationType,
    PerformanceSnapshot, RiskLevel, RollbackAction, TuningAction,
};
pub use performance::{MetricType, PerformanceBaseline, PerformanceMetric};
pub use resource_allocation::{
    AllocationStatus, ResourceAllocation, ResourcePoolConfig, ResourceType,
};
pub use workflow_step::{
    FailureAction, ResourceUsageSample, StepCondition, StepSpec, StepType, WorkflowStep,
};
