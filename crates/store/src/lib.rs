//! Storage adapters for the product store port.
//!
//! [`InMemoryStore`] keeps committed products in a shared map and is what tests
//! and local runs use. [`PostgresStore`] persists them in the tables created by
//! the migrations under `migrations/`. Both also serve the allocations read
//! path through [`AllocationsView`].

pub mod memory;
pub mod postgres;
pub mod views;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use views::{AllocationRow, AllocationsView};
