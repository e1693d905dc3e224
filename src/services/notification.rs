use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    JobFailed,
    JobTimedOut,
    BottleneckAlert,
    OptimizationFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub subject: String,
    pub message: String,
    pub job_id: Option<Uuid>,
    pub severity: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
            job_id: None,
            severity: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_severity(mut self, severity: f64) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Delivers alerts and escalations
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> Result<()>;
}

/// Keeps every dispatched notification in memory
#[derive(Debug, Default)]
pub struct InMemoryNotificationDispatcher {
    sent: Mutex<Vec<Notification>>,
}

impl InMemoryNotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn sent_of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for InMemoryNotificationDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            kind = ?notification.kind,
            subject = %notification.subject,
            job_id = ?notification.job_id,
            "📣 NOTIFICATION"
        );
        self.sent.lock().push(notification);
        Ok(())
    }
}
