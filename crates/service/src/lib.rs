//! Service layer of the batch allocation system.
//!
//! This crate provides the [`MessageBus`] that drives a cascade of commands and
//! events to quiescence, the handlers wired to it by [`bootstrap`], and the
//! outbound ports ([`EventPublisher`], [`Notifications`]) the event handlers
//! talk to.
//!
//! A cascade starts from one message:
//! 1. A command goes to its single handler; failure stops the cascade
//! 2. An event goes to each of its handlers in turn; failures are logged
//! 3. Messages collected from every committed unit of work join the back of the queue

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod messagebus;
pub mod ports;

pub use bootstrap::{BusSettings, bootstrap};
pub use error::ServiceError;
pub use handlers::{CommandHandler, EventHandler, HandlerContext};
pub use messagebus::{CommandResult, MessageBus, MessageBusBuilder};
pub use ports::{
    EventPublisher, InMemoryEventPublisher, InMemoryNotifications, Notifications, SentNotification,
    TracingEventPublisher, TracingNotifications,
};
