use crate::framework::EntityId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Preparing,
    InTransit,
    Delivered,
}

/// Delivery of (part of) a purchase order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub entity_id: EntityId,
    pub order_id: EntityId,
    pub customer_id: EntityId,
    pub product_ids: Vec<EntityId>,
    pub status: ShipmentStatus,
}

impl Shipment {
    pub fn new(
        entity_id: impl Into<EntityId>,
        order_id: impl Into<EntityId>,
        customer_id: impl Into<EntityId>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            order_id: order_id.into(),
            customer_id: customer_id.into(),
            product_ids: Vec::new(),
            status: ShipmentStatus::Preparing,
        }
    }

    pub fn with_products<I, S>(mut self, product_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityId>,
    {
        self.product_ids.extend(product_ids.into_iter().map(Into::into));
        self
    }
}
