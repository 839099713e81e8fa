use crate::framework::EntityId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Cancelled,
}

/// One line of a purchase order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: EntityId,
    pub quantity: u32,
    pub unit_price: u64,
}

/// A customer's purchase order. `total` is kept in sync with `items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub entity_id: EntityId,
    pub customer_id: EntityId,
    pub items: Vec<OrderItem>,
    pub total: u64,
    pub status: OrderStatus,
}

impl PurchaseOrder {
    pub fn new(entity_id: impl Into<EntityId>, customer_id: impl Into<EntityId>) -> Self {
        Self {
            entity_id: entity_id.into(),
            customer_id: customer_id.into(),
            items: Vec::new(),
            total: 0,
            status: OrderStatus::Pending,
        }
    }

    pub fn with_item(mut self, product_id: impl Into<EntityId>, quantity: u32, unit_price: u64) -> Self {
        self.items.push(OrderItem {
            product_id: product_id.into(),
            quantity,
            unit_price,
        });
        self.total = self
            .total
            .saturating_add(u64::from(quantity).saturating_mul(unit_price));
        self
    }

    pub fn product_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.items.iter().map(|item| &item.product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_saturates_instead_of_overflowing() {
        let order = PurchaseOrder::new("o1", "c1")
            .with_item("p1", u32::MAX, u64::MAX)
            .with_item("p2", 1, 1);
        assert_eq!(order.total, u64::MAX);
        assert_eq!(order.items.len(), 2);
    }
}
