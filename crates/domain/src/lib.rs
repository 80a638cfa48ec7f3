//! Domain layer of the allocation service.
//!
//! This crate provides:
//! - The [`Product`] aggregate with its [`Batch`] entities and the allocation algorithm
//! - The closed [`Command`] and [`Event`] message sets, unified as [`Message`]
//! - The [`UnitOfWork`] transaction boundary and the [`TransactionalStore`] port
//!   that persistence adapters implement
//!
//! The aggregate and the unit of work live in the same crate so that draining a
//! product's pending messages stays crate-private: only [`UnitOfWork::collect_new_events`]
//! can do it.

pub mod error;
pub mod message;
pub mod product;
pub mod store;
pub mod unit_of_work;

pub use common::{BatchReference, OrderId, Sku, Version};
pub use error::{DomainError, StoreError};
pub use message::{
    Allocate, Allocated, ChangeBatchQuantity, Command, CommandKind, CreateBatch, Deallocated,
    Event, EventKind, Message, OutOfStock,
};
pub use product::{Batch, OrderLine, Product};
pub use store::{StoreTransaction, TransactionalStore};
pub use unit_of_work::{ProductRepository, UnitOfWork};
