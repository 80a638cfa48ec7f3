//! Value objects for the allocation domain.

use common::{OrderId, Sku};
use serde::{Deserialize, Serialize};

/// A quantity of one SKU requested by a customer order.
///
/// Order lines have no identity beyond their fields: two lines with the same
/// order, SKU and quantity are the same line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderLine {
    pub order_id: OrderId,
    pub sku: Sku,
    pub quantity: u32,
}

impl OrderLine {
    /// Creates a new order line.
    pub fn new(order_id: impl Into<OrderId>, sku: impl Into<Sku>, quantity: u32) -> Self {
        Self {
            order_id: order_id.into(),
            sku: sku.into(),
            quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equality_is_by_value() {
        let a = OrderLine::new("o1", "SKU", 10);
        let b = OrderLine::new("o1", "SKU", 10);
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn different_quantity_is_a_different_line() {
        assert_ne!(
            OrderLine::new("o1", "SKU", 10),
            OrderLine::new("o1", "SKU", 11)
        );
    }
}
