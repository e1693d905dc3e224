//! Controller directives: runtime changes requested by the optimizer and applied
//! by the job controller, delivered over a bounded channel with a reply per directive.

use crate::error::{Result, ScanflowError};
use crate::models::{AppliedChange, OrchestrationStrategy, RollbackAction, TuningAction};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum ControllerDirective {
    /// `job_id = None` targets every active job and the default for future jobs
    AdjustConcurrency { job_id: Option<Uuid>, delta: i32 },
    SwitchStrategy {
        job_id: Option<Uuid>,
        strategy: OrchestrationStrategy,
    },
    ResizePool { pool_id: String, capacity_factor: f64 },
    Rollback(RollbackAction),
}

impl ControllerDirective {
    /// Directive carrying out a tuning action; `None` for advisory actions
    pub fn from_action(action: &TuningAction, job_id: Option<Uuid>) -> Option<Self> {
        match action {
            TuningAction::AdjustConcurrency { delta } => Some(Self::AdjustConcurrency {
                job_id,
                delta: *delta,
            }),
            TuningAction::SwitchStrategy { strategy } => Some(Self::SwitchStrategy {
                job_id,
                strategy: *strategy,
            }),
            TuningAction::ResizePool {
                pool_id,
                capacity_factor,
            } => Some(Self::ResizePool {
                pool_id: pool_id.clone(),
                capacity_factor: *capacity_factor,
            }),
            TuningAction::Advisory => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AdjustConcurrency { .. } => "adjust_concurrency",
            Self::SwitchStrategy { .. } => "switch_strategy",
            Self::ResizePool { .. } => "resize_pool",
            Self::Rollback(_) => "rollback",
        }
    }
}

#[derive(Debug)]
pub struct DirectiveEnvelope {
    pub directive: ControllerDirective,
    pub reply: oneshot::Sender<Result<AppliedChange>>,
}

/// Sending half of the directive channel
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    sender: mpsc::Sender<DirectiveEnvelope>,
}

impl ControllerHandle {
    pub async fn send(&self, directive: ControllerDirective) -> Result<AppliedChange> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(DirectiveEnvelope { directive, reply })
            .await
            .map_err(|_| ScanflowError::Shutdown("directive channel closed".to_string()))?;
        receiver
            .await
            .map_err(|_| ScanflowError::Shutdown("controller dropped directive reply".to_string()))?
    }
}

pub fn directive_channel(capacity: usize) -> (ControllerHandle, mpsc::Receiver<DirectiveEnvelope>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (ControllerHandle { sender }, receiver)
}
