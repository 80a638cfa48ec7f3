//! Read-side queries served from committed allocation state.

use async_trait::async_trait;
use common::{BatchReference, OrderId, Sku};
use domain::StoreError;

/// One allocated line of an order: which batch serves which SKU.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AllocationRow {
    pub sku: Sku,
    pub batch_reference: BatchReference,
}

/// Lists the allocations of an order.
///
/// Reads committed state only, outside any unit of work. Rows are ordered by
/// SKU, then batch reference.
#[async_trait]
pub trait AllocationsView: Send + Sync {
    async fn allocations_for(&self, order_id: &OrderId) -> Result<Vec<AllocationRow>, StoreError>;
}
