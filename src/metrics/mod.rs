//! # Metrics and Baselines
//!
//! Append-only store of [`PerformanceMetric`](crate::models::PerformanceMetric)
//! samples, step outcomes and median baselines.

pub mod store;

pub use store::{mean, median, MetricsStore};
