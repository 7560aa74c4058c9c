use common::OrderId;
use domain::{OrderError, OrderStatus};
use thiserror::Error;

/// Errors that can occur when reading or writing the fulfillment tables.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A write would create a second row under a unique key.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// An update targeted a row that does not exist.
    #[error("{entity} not found: {id}")]
    RowNotFound { entity: &'static str, id: String },

    /// The order status written is not reachable from the stored one.
    #[error("Order {order_id}: illegal status change {from} -> {to}")]
    IllegalStatusChange {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// An accumulated quantity would leave its range. Nothing was written.
    #[error("Quantity rule violated: {0}")]
    Quantity(#[from] OrderError),

    /// A stored value could not be mapped back into the domain model.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
