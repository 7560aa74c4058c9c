//! Catalog books and stock records.

use common::BookId;
use serde::{Deserialize, Serialize};

use crate::value_objects::Money;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub list_price: Money,
}

/// On-hand stock of one book. The unsigned quantity cannot go below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub book_id: BookId,
    pub quantity: u32,
    pub safety_stock: u32,
    pub location_code: Option<String>,
}

impl InventoryRecord {
    pub fn empty(book_id: BookId) -> Self {
        Self {
            book_id,
            quantity: 0,
            safety_stock: 0,
            location_code: None,
        }
    }

    /// Units missing to reach safety stock, if below it.
    pub fn low_stock_gap(&self) -> Option<u32> {
        (self.safety_stock > 0 && self.quantity < self.safety_stock)
            .then(|| self.safety_stock - self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(quantity: u32, safety_stock: u32) -> InventoryRecord {
        InventoryRecord {
            quantity,
            safety_stock,
            ..InventoryRecord::empty(BookId::new("X"))
        }
    }

    #[test]
    fn test_low_stock_gap() {
        assert_eq!(record(3, 10).low_stock_gap(), Some(7));
        assert_eq!(record(10, 10).low_stock_gap(), None);
        assert_eq!(record(0, 0).low_stock_gap(), None);
    }
}
