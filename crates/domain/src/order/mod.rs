//! Sales orders, their lines and the order state machine.

mod aggregate;
mod line;
mod state;

pub use aggregate::{
    NewOrder, NewOrderLine, Order, PlannedLine, PricedItem, ShipmentPlan, can_ship_before_payment,
};
pub use line::{LineStatus, OrderLine};
pub use state::{OrderStatus, OrderTransition};

use common::{BookId, OrderLineId};
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} from {current} state")]
    InvalidTransition {
        current: OrderStatus,
        action: &'static str,
    },

    #[error("Order line not found: {line_id}")]
    LineNotFound { line_id: OrderLineId },

    #[error("Invalid quantity {quantity} for book {book_id} (must be greater than 0)")]
    InvalidQuantity { book_id: BookId, quantity: u32 },

    #[error("Line {line_id}: requested {requested}, only {remaining} left to ship")]
    ExceedsRemaining {
        line_id: OrderLineId,
        requested: u32,
        remaining: u32,
    },

    #[error("Line {line_id}: requested {requested}, only {awaiting} awaiting receipt")]
    ExceedsAwaiting {
        line_id: OrderLineId,
        requested: u32,
        awaiting: u32,
    },

    /// Adding `added` to `current` leaves the `u32` range.
    #[error("Quantity for book {book_id} overflows: {current} + {added}")]
    QuantityOverflow {
        book_id: BookId,
        current: u32,
        added: u32,
    },

    #[error("Nothing to ship")]
    NothingToShip,

    #[error("Nothing to receive")]
    NothingToReceive,

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,
}
