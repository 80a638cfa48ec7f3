//! Domain error types.

use common::{BatchReference, Sku, Version};
use thiserror::Error;

/// Errors raised by the product aggregate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// No batch with this reference belongs to the product.
    #[error("Batch not found: {0}")]
    BatchNotFound(BatchReference),

    /// `deallocate_one` was called on a batch with no allocations.
    #[error("Batch {0} has no allocations")]
    NoAllocations(BatchReference),

    /// A batch was added to a product with a different SKU.
    #[error("Batch sku {actual} does not match product sku {expected}")]
    SkuMismatch { expected: Sku, actual: Sku },

    /// A batch with this reference already exists on the product.
    #[error("Duplicate batch reference: {0}")]
    DuplicateBatch(BatchReference),
}

/// Errors raised by the unit of work and the persistence adapters behind it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored product moved on since it was loaded in this transaction.
    ///
    /// `actual` is the committed version when the backend can report it
    /// without another round trip.
    #[error("Concurrency conflict for product {sku}: expected version {expected}")]
    ConcurrencyConflict {
        sku: Sku,
        expected: Version,
        actual: Option<Version>,
    },

    /// A batch reference is already owned by another product.
    #[error("Batch reference {0} belongs to another product")]
    DuplicateBatch(BatchReference),

    /// A product with this SKU is already stored or tracked.
    #[error("Product already exists: {0}")]
    DuplicateProduct(Sku),

    /// The unit of work already committed or rolled back.
    #[error("Unit of work is no longer active")]
    TransactionClosed,

    /// A persisted row could not be mapped back onto the domain model.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The backing database failed.
    #[error("Database error: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wraps a backend-specific error.
    pub fn database(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Database(Box::new(err))
    }
}
