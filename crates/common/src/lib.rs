//! Shared types for the bookstore fulfillment engine.

pub mod types;

pub use types::{
    BookId, CreditTierId, CustomerId, OrderId, OrderLineId, PurchaseLineId, PurchaseOrderId,
    ShipmentId, ShipmentLineId, ShortageEntryId, ShortageRequestId, SupplierId,
};
