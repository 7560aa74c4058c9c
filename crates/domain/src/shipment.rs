//! Shipments and oldest-first receipt apportionment.

use chrono::{DateTime, Utc};
use common::{OrderId, OrderLineId, ShipmentId, ShipmentLineId};
use serde::{Deserialize, Serialize};

use crate::order::{OrderError, ShipmentPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    #[default]
    Shipped,
    /// Every line of the shipment was received.
    Delivered,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Shipped => "SHIPPED",
            ShipmentStatus::Delivered => "DELIVERED",
        }
    }
}

impl std::str::FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHIPPED" => Ok(ShipmentStatus::Shipped),
            "DELIVERED" => Ok(ShipmentStatus::Delivered),
            other => Err(format!("unknown shipment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiveStatus {
    #[default]
    Pending,
    Received,
}

impl ReceiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiveStatus::Pending => "PENDING",
            ReceiveStatus::Received => "RECEIVED",
        }
    }
}

impl std::str::FromStr for ReceiveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReceiveStatus::Pending),
            "RECEIVED" => Ok(ReceiveStatus::Received),
            other => Err(format!("unknown receive status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub order_id: OrderId,
    pub ship_time: DateTime<Utc>,
    pub carrier: String,
    pub tracking_number: String,
    pub status: ShipmentStatus,
    pub operator: String,
    pub lines: Vec<ShipmentLine>,
}

impl Shipment {
    pub fn is_fully_received(&self) -> bool {
        self.lines
            .iter()
            .all(|l| l.receive_status == ReceiveStatus::Received)
    }

    /// Marks the shipment delivered once every line is received.
    pub fn refresh_status(&mut self) {
        if self.is_fully_received() {
            self.status = ShipmentStatus::Delivered;
        }
    }
}

/// One order line's share of a shipment. `ship_quantity` never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentLine {
    pub id: ShipmentLineId,
    pub shipment_id: ShipmentId,
    pub order_line_id: OrderLineId,
    pub ship_quantity: u32,
    pub receive_status: ReceiveStatus,
    pub received_quantity: u32,
    pub received_time: Option<DateTime<Utc>>,
}

impl ShipmentLine {
    pub fn pending_quantity(&self) -> u32 {
        self.ship_quantity - self.received_quantity
    }

    pub fn receive(&mut self, quantity: u32, at: DateTime<Utc>) -> Result<(), OrderError> {
        let pending = self.pending_quantity();
        if quantity == 0 || quantity > pending {
            return Err(OrderError::ExceedsAwaiting {
                line_id: self.order_line_id,
                requested: quantity,
                awaiting: pending,
            });
        }
        self.received_quantity += quantity;
        self.received_time = Some(at);
        if self.received_quantity == self.ship_quantity {
            self.receive_status = ReceiveStatus::Received;
        }
        Ok(())
    }
}

/// A shipment not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewShipment {
    pub order_id: OrderId,
    pub ship_time: DateTime<Utc>,
    pub carrier: String,
    pub tracking_number: String,
    pub operator: String,
    pub lines: Vec<(OrderLineId, u32)>,
}

impl NewShipment {
    pub fn from_plan(
        order_id: OrderId,
        plan: &ShipmentPlan,
        carrier: impl Into<String>,
        tracking_number: impl Into<String>,
        operator: impl Into<String>,
        ship_time: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            ship_time,
            carrier: carrier.into(),
            tracking_number: tracking_number.into(),
            operator: operator.into(),
            lines: plan
                .lines()
                .iter()
                .map(|l| (l.order_line_id, l.quantity))
                .collect(),
        }
    }
}

/// Units of a receipt assigned to one shipment line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub shipment_id: ShipmentId,
    pub shipment_line_id: ShipmentLineId,
    pub quantity: u32,
}

/// Splits `quantity` received units of one order line across its shipment
/// lines, oldest shipment first.
///
/// The result depends only on shipment creation order, never on the order of
/// `lines`. Fails if the pending units of the order line cannot cover
/// `quantity`.
pub fn apportion_receipt(
    lines: &[ShipmentLine],
    order_line_id: OrderLineId,
    quantity: u32,
) -> Result<Vec<Allocation>, OrderError> {
    let mut candidates: Vec<&ShipmentLine> = lines
        .iter()
        .filter(|l| l.order_line_id == order_line_id && l.pending_quantity() > 0)
        .collect();
    candidates.sort_by_key(|l| (l.shipment_id, l.id));

    let mut left = quantity;
    let mut allocations = Vec::new();
    for line in candidates {
        if left == 0 {
            break;
        }
        let take = left.min(line.pending_quantity());
        allocations.push(Allocation {
            shipment_id: line.shipment_id,
            shipment_line_id: line.id,
            quantity: take,
        });
        left -= take;
    }

    if left > 0 {
        return Err(OrderError::ExceedsAwaiting {
            line_id: order_line_id,
            requested: quantity,
            awaiting: quantity - left,
        });
    }
    Ok(allocations)
}
