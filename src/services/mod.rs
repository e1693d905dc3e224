//! # Collaborator Services
//!
//! Narrow interfaces to the systems the orchestration core consumes but does
//! not own, each with an in-memory implementation used by default and in tests:
//!
//! - [`TargetResolver`]: target identifier → connection descriptor
//! - [`ComplianceEvaluator`]: classification/compliance checks per completed scan step
//! - [`NotificationDispatcher`]: alerts and escalations
//! - [`OrchestrationRepository`]: durable records for jobs, steps, allocations,
//!   recommendations and optimization results

pub mod compliance;
pub mod notification;
pub mod repository;
pub mod target_resolver;

pub use compliance::{
    ComplianceEvaluator, ComplianceFinding, ComplianceReport, InMemoryComplianceEvaluator,
};
pub use notification::{
    InMemoryNotificationDispatcher, Notification, NotificationDispatcher, NotificationKind,
};
pub use repository::{InMemoryRepository, OrchestrationRepository};
pub use target_resolver::{ConnectionDescriptor, StaticTargetResolver, TargetResolver};
