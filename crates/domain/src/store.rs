//! Persistence port implemented by storage adapters.

use async_trait::async_trait;
use common::{BatchReference, Sku, Version};

use crate::error::StoreError;
use crate::product::Product;

/// One open transaction against the product store.
///
/// Implementations must discard every staged change when the transaction is
/// dropped without [`commit`](StoreTransaction::commit). The unit of work relies
/// on this for rollback on every exit path.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Loads a product by SKU.
    async fn load(&mut self, sku: &Sku) -> Result<Option<Product>, StoreError>;

    /// Loads the product owning the batch with this reference.
    async fn load_by_batch_reference(
        &mut self,
        reference: &BatchReference,
    ) -> Result<Option<Product>, StoreError>;

    /// Stages a product that does not exist in the store yet.
    ///
    /// Fails with `DuplicateProduct` if the SKU is already stored.
    async fn insert(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Stages the new state of a loaded product.
    ///
    /// Fails with `ConcurrencyConflict` unless the stored version still equals
    /// `expected`, the version observed when the product was loaded.
    async fn update(&mut self, product: &Product, expected: Version) -> Result<(), StoreError>;

    /// Makes every staged change durable.
    ///
    /// Fails with `DuplicateBatch` if a staged batch reference belongs to
    /// another product, and with `ConcurrencyConflict` if a concurrent
    /// writer got there first.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discards every staged change.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Factory of store transactions. One per database.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Opens a new transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}
