//! # Event Publisher
//!
//! Broadcast fan-out of lifecycle events. Subscribers that lag behind lose the
//! oldest events rather than blocking publishers.
//!
//! ```rust
//! use scanflow_core::events::EventPublisher;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut events = publisher.subscribe();
//!
//! publisher.publish("job.started", json!({"job_id": "scan-1"}));
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.name, "job.started");
//! # });
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

/// Fan-out publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: DateTime<Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event_name: impl Into<String>, context: Value) {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: Utc::now(),
        };
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let publisher = EventPublisher::new(16);
        let mut receiver = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.publish("job.created", json!({ "job_id": "abc" }));
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.name, "job.created");
        assert_eq!(event.context["job_id"], "abc");
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let publisher = EventPublisher::default();
        publisher.publish("job.created", Value::Null);
    }
}
