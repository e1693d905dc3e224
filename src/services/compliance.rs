use crate::error::Result;
use crate::models::WorkflowStep;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceFinding {
    pub rule: String,
    pub severity: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ComplianceReport {
    pub compliant: bool,
    pub findings: Vec<ComplianceFinding>,
}

/// Classification and compliance checks run after every completed scan step
#[async_trait]
pub trait ComplianceEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        job_id: Uuid,
        step: &WorkflowStep,
        scan_output: &Value,
    ) -> Result<ComplianceReport>;
}

/// Flags scan outputs that report `sensitive_columns`; remembers what it evaluated
#[derive(Debug, Default)]
pub struct InMemoryComplianceEvaluator {
    evaluated: Mutex<Vec<(Uuid, String)>>,
}

impl InMemoryComplianceEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(job_id, step_id)` pairs in evaluation order
    pub fn evaluated(&self) -> Vec<(Uuid, String)> {
        self.evaluated.lock().clone()
    }
}

#[async_trait]
impl ComplianceEvaluator for InMemoryComplianceEvaluator {
    async fn evaluate(
        &self,
        job_id: Uuid,
        step: &WorkflowStep,
        scan_output: &Value,
    ) -> Result<ComplianceReport> {
        self.evaluated.lock().push((job_id, step.id.clone()));

        let findings: Vec<ComplianceFinding> = scan_output
            .get("sensitive_columns")
            .and_then(Value::as_array)
            .map(|columns| {
                columns
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|column| ComplianceFinding {
                        rule: "sensitive_data_exposure".to_string(),
                        severity: "high".to_string(),
                        message: format!("column '{column}' holds unclassified sensitive data"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ComplianceReport {
            compliant: findings.is_empty(),
            findings,
        })
    }
}
