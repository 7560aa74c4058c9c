//! Order state machine.

use serde::{Deserialize, Serialize};

use super::OrderError;

/// The status of a sales order in its lifecycle.
///
/// State transitions:
/// ```text
/// PendingPayment ──hold──► OutOfStockPending ──release──► PendingPayment
/// PendingPayment | OutOfStockPending ──pay──► PendingShipment ──ship──► Delivering
/// PendingPayment | OutOfStockPending ──ship (overdraft tier)──► Delivering
/// Delivering ──receive all──► Completed (or PendingPayment while unpaid)
/// PendingPayment ──pay, all received──► Completed
/// PendingPayment | OutOfStockPending ──cancel / reject──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Placed, waiting for the customer to pay.
    #[default]
    PendingPayment,

    /// Customer asked for the shortage to be reviewed before paying.
    OutOfStockPending,

    /// Paid, nothing shipped yet.
    PendingShipment,

    /// At least one shipment is out; re-entered by every further shipment.
    Delivering,

    Completed,

    Cancelled,
}

/// A guarded move of the order state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTransition {
    /// Customer chose to wait for an administrator's shortage review.
    HoldForShortage,
    /// The last pending shortage request was accepted.
    ReleaseShortageHold,
    /// An administrator rejected the shortage request.
    RejectShortage,
    /// Payment captured.
    Settle { fully_received: bool },
    /// A shipment left the warehouse.
    Dispatch { ship_before_pay: bool },
    /// Goods were confirmed received.
    Receive { fully_received: bool, paid: bool },
    Cancel { shipped_any: bool },
}

impl OrderTransition {
    pub fn action(&self) -> &'static str {
        match self {
            OrderTransition::HoldForShortage => "hold for shortage review",
            OrderTransition::ReleaseShortageHold => "release shortage hold",
            OrderTransition::RejectShortage => "reject shortage",
            OrderTransition::Settle { .. } => "pay",
            OrderTransition::Dispatch { .. } => "ship",
            OrderTransition::Receive { .. } => "confirm receipt",
            OrderTransition::Cancel { .. } => "cancel",
        }
    }
}

impl OrderStatus {
    /// The single transition table of the order lifecycle.
    pub fn apply(self, transition: OrderTransition) -> Result<OrderStatus, OrderError> {
        use OrderStatus::*;
        use OrderTransition::*;

        let next = match (self, transition) {
            (PendingPayment, HoldForShortage) => OutOfStockPending,
            (OutOfStockPending, ReleaseShortageHold) => PendingPayment,
            (OutOfStockPending, RejectShortage) => Cancelled,

            (PendingPayment | OutOfStockPending, Settle { fully_received: false }) => {
                PendingShipment
            }
            (PendingPayment, Settle { fully_received: true }) => Completed,
            (Delivering, Settle { .. }) => Delivering,

            (PendingShipment | Delivering, Dispatch { .. }) => Delivering,
            (PendingPayment | OutOfStockPending, Dispatch { ship_before_pay: true }) => Delivering,

            (Delivering, Receive { fully_received: false, .. }) => Delivering,
            (Delivering, Receive { fully_received: true, paid: true }) => Completed,
            (Delivering, Receive { fully_received: true, paid: false }) => PendingPayment,

            (PendingPayment | OutOfStockPending, Cancel { shipped_any: false }) => Cancelled,

            (current, transition) => {
                return Err(OrderError::InvalidTransition {
                    current,
                    action: transition.action(),
                });
            }
        };
        Ok(next)
    }

    /// Whether any transition leads from `self` to `next`.
    ///
    /// Persistence uses this to refuse writing a status that the table above
    /// could not have produced.
    pub fn can_become(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        self == next
            || matches!(
                (self, next),
                (PendingPayment, OutOfStockPending)
                    | (OutOfStockPending, PendingPayment)
                    | (OutOfStockPending, Cancelled)
                    | (PendingPayment | OutOfStockPending, PendingShipment)
                    | (PendingPayment, Completed)
                    | (PendingPayment | OutOfStockPending | PendingShipment, Delivering)
                    | (Delivering, Completed)
                    | (Delivering, PendingPayment)
                    | (PendingPayment, Cancelled)
            )
    }

    pub fn can_pay(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingPayment | OrderStatus::OutOfStockPending | OrderStatus::Delivering
        )
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingPayment | OrderStatus::OutOfStockPending
        )
    }

    /// Statuses that need payment before shipping, unless the tier allows it.
    pub fn awaits_payment(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingPayment | OrderStatus::OutOfStockPending
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::OutOfStockPending => "OUT_OF_STOCK_PENDING",
            OrderStatus::PendingShipment => "PENDING_SHIPMENT",
            OrderStatus::Delivering => "DELIVERING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_PAYMENT" => Ok(OrderStatus::PendingPayment),
            "OUT_OF_STOCK_PENDING" => Ok(OrderStatus::OutOfStockPending),
            "PENDING_SHIPMENT" => Ok(OrderStatus::PendingShipment),
            "DELIVERING" => Ok(OrderStatus::Delivering),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}
