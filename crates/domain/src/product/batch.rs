//! Batch entity.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use common::{BatchReference, Sku};

use super::OrderLine;
use crate::error::DomainError;

/// A shipment of stock for one SKU, either in the warehouse (`eta` is `None`)
/// or expected to arrive on `eta`.
///
/// Identity and equality are by `reference` only.
#[derive(Debug, Clone)]
pub struct Batch {
    reference: BatchReference,
    sku: Sku,
    purchased_quantity: u32,
    eta: Option<NaiveDate>,
    allocations: BTreeSet<OrderLine>,
}

impl Batch {
    /// Creates an empty batch.
    pub fn new(
        reference: impl Into<BatchReference>,
        sku: impl Into<Sku>,
        purchased_quantity: u32,
        eta: Option<NaiveDate>,
    ) -> Self {
        Self {
            reference: reference.into(),
            sku: sku.into(),
            purchased_quantity,
            eta,
            allocations: BTreeSet::new(),
        }
    }

    /// Rebuilds a batch from persisted state.
    pub fn restore(
        reference: BatchReference,
        sku: Sku,
        purchased_quantity: u32,
        eta: Option<NaiveDate>,
        allocations: impl IntoIterator<Item = OrderLine>,
    ) -> Self {
        Self {
            reference,
            sku,
            purchased_quantity,
            eta,
            allocations: allocations.into_iter().collect(),
        }
    }

    pub fn reference(&self) -> &BatchReference {
        &self.reference
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn eta(&self) -> Option<NaiveDate> {
        self.eta
    }

    pub fn purchased_quantity(&self) -> u32 {
        self.purchased_quantity
    }

    /// Returns the order lines currently allocated to this batch.
    pub fn allocations(&self) -> impl Iterator<Item = &OrderLine> {
        self.allocations.iter()
    }

    /// Returns true if `line` is allocated to this batch.
    pub fn is_allocated(&self, line: &OrderLine) -> bool {
        self.allocations.contains(line)
    }

    /// Sum of the quantities of all allocated lines.
    pub fn allocated_quantity(&self) -> i64 {
        self.allocations.iter().map(|l| i64::from(l.quantity)).sum()
    }

    /// Purchased minus allocated quantity.
    ///
    /// Only negative while a quantity change is being applied.
    pub fn available_quantity(&self) -> i64 {
        i64::from(self.purchased_quantity) - self.allocated_quantity()
    }

    /// Returns true if the SKU matches and there is room for the line.
    pub fn can_allocate(&self, line: &OrderLine) -> bool {
        self.sku == line.sku && self.available_quantity() >= i64::from(line.quantity)
    }

    /// Allocates the line if possible. Allocating an already allocated line is a no-op.
    pub fn allocate(&mut self, line: OrderLine) {
        if self.can_allocate(&line) {
            self.allocations.insert(line);
        }
    }

    /// Removes the line if it is allocated here.
    pub fn deallocate(&mut self, line: &OrderLine) {
        self.allocations.remove(line);
    }

    /// Removes and returns one allocated line.
    pub fn deallocate_one(&mut self) -> Result<OrderLine, DomainError> {
        self.allocations
            .pop_last()
            .ok_or_else(|| DomainError::NoAllocations(self.reference.clone()))
    }

    pub(crate) fn set_purchased_quantity(&mut self, quantity: u32) {
        self.purchased_quantity = quantity;
    }

    /// Allocation priority: batches in the warehouse first, then by earliest eta.
    pub fn priority_cmp(&self, other: &Batch) -> Ordering {
        match (self.eta, other.eta) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(&b),
        }
    }
}

impl PartialEq for Batch {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl Eq for Batch {}

impl std::hash::Hash for Batch {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.reference.hash(state);
    }
}
