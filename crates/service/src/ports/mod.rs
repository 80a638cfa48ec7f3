//! Outbound ports used by event handlers, with in-memory and tracing adapters.

pub mod notifications;
pub mod publisher;

pub use notifications::{
    InMemoryNotifications, Notifications, SentNotification, TracingNotifications,
};
pub use publisher::{EventPublisher, InMemoryEventPublisher, TracingEventPublisher};
