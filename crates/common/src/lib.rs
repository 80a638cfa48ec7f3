//! Identifiers shared by every layer of the allocation service.

mod types;

pub use types::{BatchReference, CascadeId, OrderId, Sku, Version};
