//! Lifecycle event stream
//!
//! Every job, step, allocation, bottleneck and optimization transition is
//! published here; event names live in [`crate::constants::events`].

pub mod publisher;

pub use publisher::{EventPublisher, PublishedEvent};
