//! Notification sender trait and its adapters.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::ServiceError;

/// Sends human-facing notifications, such as emails to the stock team.
#[async_trait]
pub trait Notifications: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), ServiceError>;
}

/// A notification captured by [`InMemoryNotifications`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct InMemoryNotificationsState {
    sent: Vec<SentNotification>,
    fail_on_send: bool,
}

/// In-memory notification sender for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifications {
    state: Arc<RwLock<InMemoryNotificationsState>>,
}

impl InMemoryNotifications {
    /// Creates a new in-memory notification sender.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the sender to fail every send call.
    pub fn set_fail_on_send(&self, fail: bool) {
        if let Ok(mut state) = self.state.write() {
            state.fail_on_send = fail;
        }
    }

    /// Returns every notification sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentNotification> {
        self.state
            .read()
            .map(|state| state.sent.clone())
            .unwrap_or_default()
    }

    /// Returns the notifications sent to `recipient`.
    pub fn sent_to(&self, recipient: &str) -> Vec<SentNotification> {
        self.sent()
            .into_iter()
            .filter(|n| n.recipient == recipient)
            .collect()
    }
}

#[async_trait]
impl Notifications for InMemoryNotifications {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), ServiceError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ServiceError::Notification("notification state poisoned".to_string()))?;

        if state.fail_on_send {
            return Err(ServiceError::Notification("Mail server unavailable".to_string()));
        }

        state.sent.push(SentNotification {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Sender that writes every notification to the log. Used when no mail relay is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifications;

#[async_trait]
impl Notifications for TracingNotifications {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), ServiceError> {
        tracing::info!(recipient, subject, body, "notification sent");
        Ok(())
    }
}
