//! Service error types.

use common::Sku;
use domain::{CommandKind, DomainError, StoreError};
use thiserror::Error;

/// Errors that can occur while handling messages.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A command named a SKU with no product.
    #[error("Invalid sku {0}")]
    InvalidSku(Sku),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Store error, including optimistic concurrency conflicts.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// No handler is registered for this command kind.
    #[error("No handler registered for command {0}")]
    MissingCommandHandler(CommandKind),

    /// More than one handler was registered for this command kind.
    #[error("More than one handler registered for command {0}")]
    DuplicateCommandHandler(CommandKind),

    /// A handler received a message it was not registered for.
    #[error("Handler {handler} cannot handle {message}")]
    UnexpectedMessage {
        handler: &'static str,
        message: &'static str,
    },

    /// The event publisher failed.
    #[error("Publish error: {0}")]
    Publish(String),

    /// The notification sender failed.
    #[error("Notification error: {0}")]
    Notification(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    /// Returns true when the command lost an optimistic concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::Store(StoreError::ConcurrencyConflict { .. }))
    }
}

/// Convenience type alias for service results.
pub type Result<T> = std::result::Result<T, ServiceError>;
