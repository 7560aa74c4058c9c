//! Order fulfillment and credit-gated settlement engine.
//!
//! Every operation opens one unit of work on the [`store::Store`], applies
//! all of its effects there and commits once:
//!
//! - [`SettlementAuthorizer`] gates payment on balance plus overdraft and
//!   upgrades credit tiers.
//! - [`InventoryLedger`] moves stock without ever going negative.
//! - [`ShortageBacklog`] keeps one open need per book and status.
//! - [`FulfillmentService`] drives orders from checkout to receipt.
//! - [`ProcurementService`] buys against the backlog and books goods in.

pub mod backlog;
pub mod error;
pub mod inventory;
pub mod notifier;
pub mod orchestrator;
pub mod procurement;
pub mod settlement;

pub use backlog::{CompletionOutcome, ShortageBacklog};
pub use error::{FulfillmentError, Result, StockShortfall};
pub use inventory::InventoryLedger;
pub use notifier::{InMemoryNotifier, LogNotifier, Notification, NotificationKind, Notifier, NotifyError};
pub use orchestrator::{
    CreateOrder, FulfillmentService, LineQuantity, OrderDetail, OrderItem, ReceiptRequest,
    ShipmentOutcome, ShipmentRequest,
};
pub use procurement::ProcurementService;
pub use settlement::{Settlement, SettlementAuthorizer};
