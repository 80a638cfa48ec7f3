//! Commands, events and the message type that carries both through the bus.

use chrono::NaiveDate;
use common::{BatchReference, OrderId, Sku};
use serde::{Deserialize, Serialize};

/// Request to add a batch of stock, creating the product on first sight of its SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBatch {
    pub reference: BatchReference,
    pub sku: Sku,
    pub quantity: u32,
    pub eta: Option<NaiveDate>,
}

impl CreateBatch {
    /// Creates a new CreateBatch command.
    pub fn new(
        reference: impl Into<BatchReference>,
        sku: impl Into<Sku>,
        quantity: u32,
        eta: Option<NaiveDate>,
    ) -> Self {
        Self {
            reference: reference.into(),
            sku: sku.into(),
            quantity,
            eta,
        }
    }
}

/// Request to allocate an order line to the best available batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocate {
    pub order_id: OrderId,
    pub sku: Sku,
    pub quantity: u32,
}

impl Allocate {
    /// Creates a new Allocate command.
    pub fn new(order_id: impl Into<OrderId>, sku: impl Into<Sku>, quantity: u32) -> Self {
        Self {
            order_id: order_id.into(),
            sku: sku.into(),
            quantity,
        }
    }
}

/// Request to change the purchased quantity of an existing batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatchQuantity {
    pub reference: BatchReference,
    pub quantity: u32,
}

impl ChangeBatchQuantity {
    /// Creates a new ChangeBatchQuantity command.
    pub fn new(reference: impl Into<BatchReference>, quantity: u32) -> Self {
        Self {
            reference: reference.into(),
            quantity,
        }
    }
}

/// An instruction with exactly one handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Command {
    CreateBatch(CreateBatch),
    Allocate(Allocate),
    ChangeBatchQuantity(ChangeBatchQuantity),
}

/// Discriminant of [`Command`], used as the handler registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    CreateBatch,
    Allocate,
    ChangeBatchQuantity,
}

impl CommandKind {
    /// Every command kind. The bus requires a handler for each of them.
    pub const ALL: [CommandKind; 3] = [
        CommandKind::CreateBatch,
        CommandKind::Allocate,
        CommandKind::ChangeBatchQuantity,
    ];

    /// Returns the command name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::CreateBatch => "CreateBatch",
            CommandKind::Allocate => "Allocate",
            CommandKind::ChangeBatchQuantity => "ChangeBatchQuantity",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Command {
    /// Returns the kind of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::CreateBatch(_) => CommandKind::CreateBatch,
            Command::Allocate(_) => CommandKind::Allocate,
            Command::ChangeBatchQuantity(_) => CommandKind::ChangeBatchQuantity,
        }
    }
}

impl From<CreateBatch> for Command {
    fn from(cmd: CreateBatch) -> Self {
        Command::CreateBatch(cmd)
    }
}

impl From<Allocate> for Command {
    fn from(cmd: Allocate) -> Self {
        Command::Allocate(cmd)
    }
}

impl From<ChangeBatchQuantity> for Command {
    fn from(cmd: ChangeBatchQuantity) -> Self {
        Command::ChangeBatchQuantity(cmd)
    }
}

/// An order line was allocated to a batch.
///
/// Serialized as `{order_id, sku, quantity, batch_reference}` when published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocated {
    pub order_id: OrderId,
    pub sku: Sku,
    pub quantity: u32,
    pub batch_reference: BatchReference,
}

/// An order line was removed from its batch and needs a new home.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deallocated {
    pub order_id: OrderId,
    pub sku: Sku,
    pub quantity: u32,
}

/// No batch of the product could take an order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutOfStock {
    pub sku: Sku,
}

/// A fact broadcast to zero or more handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    Allocated(Allocated),
    Deallocated(Deallocated),
    OutOfStock(OutOfStock),
}

/// Discriminant of [`Event`], used as the handler registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Allocated,
    Deallocated,
    OutOfStock,
}

impl EventKind {
    /// Returns the event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Allocated => "Allocated",
            EventKind::Deallocated => "Deallocated",
            EventKind::OutOfStock => "OutOfStock",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Allocated(_) => EventKind::Allocated,
            Event::Deallocated(_) => EventKind::Deallocated,
            Event::OutOfStock(_) => EventKind::OutOfStock,
        }
    }
}

impl From<Allocated> for Event {
    fn from(event: Allocated) -> Self {
        Event::Allocated(event)
    }
}

impl From<Deallocated> for Event {
    fn from(event: Deallocated) -> Self {
        Event::Deallocated(event)
    }
}

impl From<OutOfStock> for Event {
    fn from(event: OutOfStock) -> Self {
        Event::OutOfStock(event)
    }
}

/// Anything the message bus can dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Command(Command),
    Event(Event),
}

impl Message {
    /// Returns the message name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Command(cmd) => cmd.kind().as_str(),
            Message::Event(event) => event.kind().as_str(),
        }
    }
}

impl From<Command> for Message {
    fn from(cmd: Command) -> Self {
        Message::Command(cmd)
    }
}

impl From<Event> for Message {
    fn from(event: Event) -> Self {
        Message::Event(event)
    }
}

impl From<CreateBatch> for Message {
    fn from(cmd: CreateBatch) -> Self {
        Message::Command(cmd.into())
    }
}

impl From<Allocate> for Message {
    fn from(cmd: Allocate) -> Self {
        Message::Command(cmd.into())
    }
}

impl From<ChangeBatchQuantity> for Message {
    fn from(cmd: ChangeBatchQuantity) -> Self {
        Message::Command(cmd.into())
    }
}

impl From<Allocated> for Message {
    fn from(event: Allocated) -> Self {
        Message::Event(event.into())
    }
}

impl From<Deallocated> for Message {
    fn from(event: Deallocated) -> Self {
        Message::Event(event.into())
    }
}

impl From<OutOfStock> for Message {
    fn from(event: OutOfStock) -> Self {
        Message::Event(event.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_serializes_flat() {
        let event = Allocated {
            order_id: OrderId::new("o1"),
            sku: Sku::new("RED-CHAIR"),
            quantity: 10,
            batch_reference: BatchReference::new("b1"),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "order_id": "o1",
                "sku": "RED-CHAIR",
                "quantity": 10,
                "batch_reference": "b1"
            })
        );
    }

    #[test]
    fn command_kinds() {
        let cmd: Command = Allocate::new("o1", "SKU", 1).into();
        assert_eq!(cmd.kind(), CommandKind::Allocate);
        assert_eq!(cmd.kind().to_string(), "Allocate");

        let cmd: Command = ChangeBatchQuantity::new("b1", 5).into();
        assert_eq!(cmd.kind(), CommandKind::ChangeBatchQuantity);
    }

    #[test]
    fn message_names() {
        let msg: Message = OutOfStock { sku: Sku::new("X") }.into();
        assert_eq!(msg.name(), "OutOfStock");

        let msg: Message = CreateBatch::new("b1", "X", 10, None).into();
        assert_eq!(msg.name(), "CreateBatch");
    }

    #[test]
    fn event_tagged_serialization_roundtrip() {
        let event: Event = OutOfStock {
            sku: Sku::new("LAMP"),
        }
        .into();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"OutOfStock\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
