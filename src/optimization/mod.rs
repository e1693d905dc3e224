//! # Adaptive Performance Optimizer
//!
//! Recommendation generation, multi-criteria ranking, predictive trend
//! analysis and staged execution of tuning changes with rollback.
//!
//! ## Flow
//!
//! - The monitor forwards each [`BottleneckDetection`](crate::models::BottleneckDetection)
//!   to the [`OptimizationRecommender`]
//! - The [`catalog`] maps the bottleneck type to candidate recommendations
//! - [`ranking`] filters them against constraints and orders them by score
//! - Low-risk actionable recommendations go straight to `pending`; the rest
//!   wait for approval
//! - The [`OptimizationExecutor`] walks each pending recommendation through
//!   `analyzing → optimizing → testing → applying → completed`, rolling the
//!   change back on failure

pub mod catalog;
pub mod executor;
pub mod predictive;
pub mod ranking;
pub mod recommender;

pub use executor::{relative_improvement, DirectiveSink, OptimizationExecutor};
pub use predictive::{degradation_risk, DegradationForecast, PredictiveAnalyzer, WATCHED_METRICS};
pub use ranking::{rank, score, RankedRecommendation};
pub use recommender::{OptimizationRecommender, OptimizationStatusReport};
