//! # Performance Monitoring
//!
//! Tiered sampling of pool utilization and step metrics, and threshold-based
//! bottleneck detection. Detections are published as events, escalated to the
//! notification dispatcher above the alert severity, and forwarded to the
//! optimization recommender over a channel.

pub mod detector;
pub mod monitor;

pub use detector::{
    degradation_severity, impact_score, latency_severity, utilization_severity,
    BottleneckDetector, Candidate,
};
pub use monitor::PerformanceMonitor;
