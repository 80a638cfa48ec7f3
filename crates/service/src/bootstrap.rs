//! Wires the default handlers into a message bus.

use std::sync::Arc;

use domain::{CommandKind, EventKind, TransactionalStore};

use crate::error::ServiceError;
use crate::handlers::{
    AddBatchHandler, AllocateHandler, ChangeBatchQuantityHandler, DEFAULT_ALLOCATED_CHANNEL,
    DEFAULT_OUT_OF_STOCK_RECIPIENT, PublishAllocatedEvent, ReallocateHandler,
    SendOutOfStockNotification,
};
use crate::messagebus::MessageBus;
use crate::ports::{EventPublisher, Notifications};

/// Destinations used by the default event handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    /// Channel `Allocated` events are published on.
    pub allocated_channel: String,
    /// Who is told when a SKU runs out of stock.
    pub out_of_stock_recipient: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            allocated_channel: DEFAULT_ALLOCATED_CHANNEL.to_string(),
            out_of_stock_recipient: DEFAULT_OUT_OF_STOCK_RECIPIENT.to_string(),
        }
    }
}

/// Builds the message bus with every command handler and the default event handlers:
///
/// | event         | handlers                              |
/// |---------------|---------------------------------------|
/// | `Allocated`   | publish on the allocated channel      |
/// | `OutOfStock`  | notify the out-of-stock recipient     |
/// | `Deallocated` | queue a new `Allocate` for the line   |
pub fn bootstrap(
    store: Arc<dyn TransactionalStore>,
    publisher: Arc<dyn EventPublisher>,
    notifications: Arc<dyn Notifications>,
    settings: &BusSettings,
) -> Result<MessageBus, ServiceError> {
    MessageBus::builder(store)
        .command_handler(CommandKind::CreateBatch, AddBatchHandler)
        .command_handler(CommandKind::Allocate, AllocateHandler)
        .command_handler(CommandKind::ChangeBatchQuantity, ChangeBatchQuantityHandler)
        .event_handler(
            EventKind::Allocated,
            PublishAllocatedEvent::new(publisher, settings.allocated_channel.clone()),
        )
        .event_handler(
            EventKind::OutOfStock,
            SendOutOfStockNotification::new(
                notifications,
                settings.out_of_stock_recipient.clone(),
            ),
        )
        .event_handler(EventKind::Deallocated, ReallocateHandler)
        .build()
}
