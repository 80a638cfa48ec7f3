//! Event publisher trait and its adapters.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::ServiceError;

/// Publishes serialized events to a named channel.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryPublisherState {
    published: Vec<(String, String)>,
    fail_on_publish: bool,
}

/// In-memory event publisher for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    state: Arc<RwLock<InMemoryPublisherState>>,
}

impl InMemoryEventPublisher {
    /// Creates a new in-memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the publisher to fail every publish call.
    pub fn set_fail_on_publish(&self, fail: bool) {
        if let Ok(mut state) = self.state.write() {
            state.fail_on_publish = fail;
        }
    }

    /// Returns every `(channel, payload)` published so far, oldest first.
    pub fn published(&self) -> Vec<(String, String)> {
        self.state
            .read()
            .map(|state| state.published.clone())
            .unwrap_or_default()
    }

    /// Returns the payloads published on `channel`, oldest first.
    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), ServiceError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ServiceError::Publish("publisher state poisoned".to_string()))?;

        if state.fail_on_publish {
            return Err(ServiceError::Publish("Channel unavailable".to_string()));
        }

        state
            .published
            .push((channel.to_string(), payload.to_string()));
        Ok(())
    }
}

/// Publisher that writes every event to the log. Used when no broker is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), ServiceError> {
        tracing::info!(channel, payload, "event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_published_payloads_per_channel() {
        let publisher = InMemoryEventPublisher::new();
        publisher.publish("line_allocated", "{\"a\":1}").await.unwrap();
        publisher.publish("other", "{}").await.unwrap();

        assert_eq!(publisher.published().len(), 2);
        assert_eq!(publisher.published_on("line_allocated"), vec!["{\"a\":1}"]);
    }

    #[tokio::test]
    async fn fail_on_publish_records_nothing() {
        let publisher = InMemoryEventPublisher::new();
        publisher.set_fail_on_publish(true);

        assert!(publisher.publish("line_allocated", "{}").await.is_err());
        assert!(publisher.published().is_empty());
    }
}
