//! Step handler contract and the built-in handlers.

use crate::error::StepExecutionError;
use crate::models::{ResourceUsageSample, StepType};
use crate::services::ConnectionDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Everything a handler sees for one step attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    pub job_id: Uuid,
    pub step_id: String,
    pub step_type: StepType,
    /// 1-based attempt number
    pub attempt: u32,
    pub target: Option<String>,
    pub connection: Option<ConnectionDescriptor>,
    pub job_context: Value,
    /// Results of completed dependencies keyed by step id
    pub dependency_results: HashMap<String, Value>,
}

/// Successful step outcome reported by a handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StepOutput {
    pub result: Value,
    /// In [0, 1]; `None` leaves the step without a quality score
    pub quality_score: Option<f64>,
    pub resource_usage: ResourceUsageSample,
}

impl StepOutput {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            quality_score: None,
            resource_usage: ResourceUsageSample::default(),
        }
    }

    pub fn with_quality(mut self, quality_score: f64) -> Self {
        self.quality_score = Some(quality_score.clamp(0.0, 1.0));
        self
    }

    pub fn with_usage(mut self, usage: ResourceUsageSample) -> Self {
        self.resource_usage = usage;
        self
    }
}

/// Executes one kind of step
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, context: StepContext) -> Result<StepOutput, StepExecutionError>;
}

/// Default handler: acknowledges the step and echoes what it was given
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughHandler;

#[async_trait]
impl StepHandler for PassthroughHandler {
    async fn execute(&self, context: StepContext) -> Result<StepOutput, StepExecutionError> {
        let result = match context.step_type {
            StepType::Scan => json!({
                "target": context.target,
                "source_type": context.connection.as_ref().map(|c| c.source_type.clone()),
                "sensitive_columns": [],
            }),
            StepType::Validation => json!({ "validated": context.dependency_results.len() }),
            StepType::Enrichment => json!({ "enriched": context.dependency_results.keys().collect::<Vec<_>>() }),
            StepType::Notification => json!({ "notified": true }),
        };
        Ok(StepOutput::new(result).with_quality(1.0))
    }
}
