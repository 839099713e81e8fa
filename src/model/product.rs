use crate::framework::EntityId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A product in the inventory. Prices are in cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub entity_id: EntityId,
    pub name: String,
    pub price: u64,
    pub stock: u32,
}

/// Errors that can occur during product operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProductError {
    /// The requested quantity exceeds the available stock.
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },

    /// The provided quantity is invalid (zero).
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u32),
}

impl Product {
    /// Creates a new Product instance.
    ///
    /// # Arguments
    /// * `entity_id` - Unique identifier
    /// * `name` - Product name
    /// * `price` - Unit price in cents
    /// * `stock` - Available stock quantity
    pub fn new(entity_id: impl Into<EntityId>, name: impl Into<String>, price: u64, stock: u32) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: name.into(),
            price,
            stock,
        }
    }

    /// Takes `quantity` units out of stock.
    ///
    /// # Errors
    /// Fails if the quantity is zero or exceeds the available stock; stock is unchanged then.
    pub fn reserve(&mut self, quantity: u32) -> Result<(), ProductError> {
        if quantity == 0 {
            return Err(ProductError::InvalidQuantity(quantity));
        }
        if quantity > self.stock {
            return Err(ProductError::InsufficientStock {
                requested: quantity,
                available: self.stock,
            });
        }
        self.stock -= quantity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_decrements_stock_or_fails_untouched() {
        let mut product = Product::new("p1", "Widget", 250, 3);
        product.reserve(2).unwrap();
        assert_eq!(product.stock, 1);
        assert_eq!(
            product.reserve(5),
            Err(ProductError::InsufficientStock {
                requested: 5,
                available: 1
            })
        );
        assert_eq!(product.reserve(0), Err(ProductError::InvalidQuantity(0)));
        assert_eq!(product.stock, 1);
    }
}
