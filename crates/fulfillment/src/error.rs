//! Fulfillment error types.

use common::{BookId, OrderId, SupplierId};
use domain::{Money, OrderError, OverdraftPolicy};
use serde::Serialize;
use store::StoreError;
use thiserror::Error;

/// One book that cannot be covered from stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockShortfall {
    pub book_id: BookId,
    pub on_hand: u32,
    pub required: u32,
}

/// Errors that can occur during fulfillment operations.
///
/// Any of these aborts the enclosing unit of work.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation is not allowed in the current state.
    #[error("Cannot {action} {entity} {id} in state {state}")]
    InvalidState {
        entity: &'static str,
        id: String,
        state: String,
        action: String,
    },

    /// Balance plus overdraft allowance does not cover the payable amount.
    #[error("Insufficient funds: payable {payable}, balance {balance}, {overdraft}")]
    InsufficientFunds {
        payable: Money,
        balance: Money,
        overdraft: OverdraftPolicy,
    },

    /// Lists every short book, not only the first one found.
    #[error("Insufficient stock for {} book(s)", shortfalls.len())]
    InsufficientStock { shortfalls: Vec<StockShortfall> },

    /// A ship, receive or order quantity outside its bound.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(OrderError),

    #[error("Supplier {supplier_id} has no supply agreement for book {book_id}")]
    NoSupplyAgreement {
        supplier_id: SupplierId,
        book_id: BookId,
    },

    #[error("No shortage entries given")]
    NothingToPurchase,

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for FulfillmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Quantity(e) => FulfillmentError::InvalidQuantity(e),
            other => FulfillmentError::Store(other),
        }
    }
}

impl FulfillmentError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        FulfillmentError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid_state(
        entity: &'static str,
        id: impl ToString,
        state: impl ToString,
        action: impl Into<String>,
    ) -> Self {
        FulfillmentError::InvalidState {
            entity,
            id: id.to_string(),
            state: state.to_string(),
            action: action.into(),
        }
    }

    /// Maps an order rule violation on `order_id`.
    pub(crate) fn order(order_id: OrderId, err: OrderError) -> Self {
        match err {
            OrderError::InvalidTransition { current, action } => {
                Self::invalid_state("order", order_id, current, action)
            }
            OrderError::LineNotFound { line_id } => Self::not_found("order line", line_id),
            other => FulfillmentError::InvalidQuantity(other),
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FulfillmentError::NotFound { .. } => "not_found",
            FulfillmentError::InvalidState { .. } => "invalid_state",
            FulfillmentError::InsufficientFunds { .. } => "insufficient_funds",
            FulfillmentError::InsufficientStock { .. } => "insufficient_stock",
            FulfillmentError::InvalidQuantity(_) => "invalid_quantity",
            FulfillmentError::NoSupplyAgreement { .. } => "no_supply_agreement",
            FulfillmentError::NothingToPurchase => "invalid_quantity",
            FulfillmentError::Store(_) => "store",
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
