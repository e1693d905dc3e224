//! Step handlers with scripted behavior.

use async_trait::async_trait;
use scanflow_core::error::StepExecutionError;
use scanflow_core::registry::{StepContext, StepHandler, StepOutput};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Always fails permanently
pub struct FailingHandler {
    pub message: &'static str,
}

#[async_trait]
impl StepHandler for FailingHandler {
    async fn execute(&self, _context: StepContext) -> Result<StepOutput, StepExecutionError> {
        Err(StepExecutionError::permanent(self.message))
    }
}

/// Fails transiently for the first `failures` calls, then succeeds
pub struct FlakyHandler {
    pub failures: u32,
    pub calls: AtomicU32,
}

impl FlakyHandler {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepHandler for FlakyHandler {
    async fn execute(&self, context: StepContext) -> Result<StepOutput, StepExecutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(StepExecutionError::transient(format!(
                "connection reset on attempt {}",
                context.attempt
            )));
        }
        Ok(StepOutput::new(json!({ "attempt": context.attempt })))
    }
}

/// Sleeps before succeeding
pub struct SlowHandler {
    pub delay: Duration,
}

#[async_trait]
impl StepHandler for SlowHandler {
    async fn execute(&self, context: StepContext) -> Result<StepOutput, StepExecutionError> {
        tokio::time::sleep(self.delay).await;
        Ok(StepOutput::new(json!({ "step": context.step_id })))
    }
}

pub struct PanickingHandler;

#[async_trait]
impl StepHandler for PanickingHandler {
    async fn execute(&self, _context: StepContext) -> Result<StepOutput, StepExecutionError> {
        panic!("handler bug");
    }
}
