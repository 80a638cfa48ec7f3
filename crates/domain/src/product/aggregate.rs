//! Product aggregate implementation.

use std::collections::VecDeque;

use common::{BatchReference, Sku, Version};

use super::{Batch, OrderLine};
use crate::error::DomainError;
use crate::message::{Allocate, Allocated, Message, OutOfStock};

/// Product aggregate root.
///
/// Owns every batch of one SKU and is the unit of consistency for allocation.
/// Operations record their outcome as pending messages which the unit of work
/// collects after a successful commit.
#[derive(Debug)]
pub struct Product {
    /// SKU shared by all batches.
    sku: Sku,

    /// Batches in insertion order.
    batches: Vec<Batch>,

    /// Optimistic concurrency token, bumped on every successful allocation.
    version: Version,

    /// Messages recorded since the last drain.
    events: VecDeque<Message>,
}

impl Product {
    /// Creates a new product with the given batches.
    pub fn new(sku: impl Into<Sku>, batches: Vec<Batch>) -> Self {
        Self::restore(sku.into(), batches, Version::initial())
    }

    /// Rebuilds a product from persisted state. The pending queue starts empty.
    pub fn restore(sku: Sku, batches: Vec<Batch>, version: Version) -> Self {
        Self {
            sku,
            batches,
            version,
            events: VecDeque::new(),
        }
    }
}

// Query methods
impl Product {
    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns all batches in insertion order.
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Returns the batch with the given reference.
    pub fn batch(&self, reference: &BatchReference) -> Option<&Batch> {
        self.batches.iter().find(|b| b.reference() == reference)
    }

    /// Returns true if one of the batches has this reference.
    pub fn has_batch(&self, reference: &BatchReference) -> bool {
        self.batch(reference).is_some()
    }

    /// Returns the messages recorded since the last drain, oldest first.
    pub fn pending_events(&self) -> impl Iterator<Item = &Message> {
        self.events.iter()
    }

    /// Drains the pending messages. Only the unit of work calls this.
    pub(crate) fn take_events(&mut self) -> Vec<Message> {
        self.events.drain(..).collect()
    }
}

// Command methods
impl Product {
    /// Appends a new batch to the product.
    pub fn add_batch(&mut self, batch: Batch) -> Result<(), DomainError> {
        if batch.sku() != &self.sku {
            return Err(DomainError::SkuMismatch {
                expected: self.sku.clone(),
                actual: batch.sku().clone(),
            });
        }

        if self.has_batch(batch.reference()) {
            return Err(DomainError::DuplicateBatch(batch.reference().clone()));
        }

        self.batches.push(batch);
        Ok(())
    }

    /// Allocates `line` to the highest-priority batch that can take it.
    ///
    /// Records `Allocated` and returns the batch reference on success. When no
    /// batch qualifies, records `OutOfStock` and returns `None`.
    pub fn allocate(&mut self, line: OrderLine) -> Option<BatchReference> {
        let chosen = self
            .batches
            .iter()
            .enumerate()
            .filter(|(_, batch)| batch.can_allocate(&line))
            .min_by(|(_, a), (_, b)| a.priority_cmp(b))
            .map(|(index, _)| index);

        let Some(index) = chosen else {
            self.events.push_back(
                OutOfStock {
                    sku: line.sku.clone(),
                }
                .into(),
            );
            return None;
        };

        let batch = &mut self.batches[index];
        let reference = batch.reference().clone();
        self.events.push_back(
            Allocated {
                order_id: line.order_id.clone(),
                sku: line.sku.clone(),
                quantity: line.quantity,
                batch_reference: reference.clone(),
            }
            .into(),
        );
        batch.allocate(line);
        self.version = self.version.next();

        Some(reference)
    }

    /// Sets the purchased quantity of a batch.
    ///
    /// When the batch ends up over-allocated, lines are removed one at a time
    /// until it fits again, and an `Allocate` command is queued for each of them.
    pub fn change_batch_quantity(
        &mut self,
        reference: &BatchReference,
        quantity: u32,
    ) -> Result<(), DomainError> {
        let batch = self
            .batches
            .iter_mut()
            .find(|b| b.reference() == reference)
            .ok_or_else(|| DomainError::BatchNotFound(reference.clone()))?;

        batch.set_purchased_quantity(quantity);
        while batch.available_quantity() < 0 {
            let line = batch.deallocate_one()?;
            self.events.push_back(
                Allocate {
                    order_id: line.order_id,
                    sku: line.sku,
                    quantity: line.quantity,
                }
                .into(),
            );
        }

        Ok(())
    }

    /// Queues an `Allocate` command for a line that lost its batch.
    pub fn reallocate(&mut self, line: OrderLine) {
        self.events.push_back(
            Allocate {
                order_id: line.order_id,
                sku: line.sku,
                quantity: line.quantity,
            }
            .into(),
        );
    }
}
