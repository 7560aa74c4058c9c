//! Order lines and their fulfilment counters.

use common::{BookId, OrderId, OrderLineId};
use serde::{Deserialize, Serialize};

use super::OrderError;
use crate::value_objects::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineStatus {
    #[default]
    Ordered,
    PartShipped,
    Shipped,
    Received,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Ordered => "ORDERED",
            LineStatus::PartShipped => "PART_SHIPPED",
            LineStatus::Shipped => "SHIPPED",
            LineStatus::Received => "RECEIVED",
        }
    }
}

impl std::fmt::Display for LineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORDERED" => Ok(LineStatus::Ordered),
            "PART_SHIPPED" => Ok(LineStatus::PartShipped),
            "SHIPPED" => Ok(LineStatus::Shipped),
            "RECEIVED" => Ok(LineStatus::Received),
            other => Err(format!("unknown line status: {other}")),
        }
    }
}

/// One title on a sales order.
///
/// `0 <= received_quantity <= shipped_quantity <= quantity` holds after every
/// mutation; the mutators refuse anything that would break it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub order_id: OrderId,
    pub book_id: BookId,
    pub quantity: u32,
    pub shipped_quantity: u32,
    pub received_quantity: u32,
    /// Post-discount price.
    pub unit_price: Money,
    pub sub_amount: Money,
    pub status: LineStatus,
}

impl OrderLine {
    pub fn remaining_to_ship(&self) -> u32 {
        self.quantity - self.shipped_quantity
    }

    pub fn awaiting_receipt(&self) -> u32 {
        self.shipped_quantity - self.received_quantity
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_quantity == self.quantity
    }

    pub fn record_shipment(&mut self, quantity: u32) -> Result<(), OrderError> {
        let remaining = self.remaining_to_ship();
        if quantity == 0 || quantity > remaining {
            return Err(OrderError::ExceedsRemaining {
                line_id: self.id,
                requested: quantity,
                remaining,
            });
        }
        self.shipped_quantity += quantity;
        self.status = if self.shipped_quantity == self.quantity {
            LineStatus::Shipped
        } else {
            LineStatus::PartShipped
        };
        Ok(())
    }

    pub fn record_receipt(&mut self, quantity: u32) -> Result<(), OrderError> {
        let awaiting = self.awaiting_receipt();
        if quantity == 0 || quantity > awaiting {
            return Err(OrderError::ExceedsAwaiting {
                line_id: self.id,
                requested: quantity,
                awaiting,
            });
        }
        self.received_quantity += quantity;
        self.status = if self.received_quantity == self.quantity {
            LineStatus::Received
        } else {
            LineStatus::PartShipped
        };
        Ok(())
    }
}
