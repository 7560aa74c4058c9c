//! Domain layer for the bookstore fulfillment engine.
//!
//! This crate holds the data model and the rules that need no storage:
//! - Money and discount arithmetic
//! - Credit tiers, overdraft policies and tier upgrades
//! - The order state machine and per-line fulfilment counters
//! - Shipments and oldest-first receipt apportionment
//! - Shortage backlog entries, customer shortage requests and purchase orders

pub mod credit;
pub mod events;
pub mod inventory;
pub mod order;
pub mod procurement;
pub mod shipment;
pub mod shortage;
pub mod value_objects;

pub use credit::{
    AvailableFunds, CreditTier, Customer, CustomerStatus, NewCustomer, OverdraftPolicy, TierTable,
};
pub use events::FulfillmentEvent;
pub use inventory::{Book, InventoryRecord};
pub use order::{
    LineStatus, NewOrder, NewOrderLine, Order, OrderError, OrderLine, OrderStatus,
    OrderTransition, PlannedLine, PricedItem, ShipmentPlan, can_ship_before_payment,
};
pub use procurement::{
    NewPurchaseLine, NewPurchaseOrder, PurchaseLine, PurchaseOrder, PurchaseStatus,
    SupplyAgreement, preferred_agreement,
};
pub use shipment::{
    Allocation, NewShipment, ReceiveStatus, Shipment, ShipmentLine, ShipmentStatus,
    apportion_receipt,
};
pub use shortage::{
    CustomerShortageRequest, DEFAULT_PRIORITY, LineShortage, NewShortage, NewShortageRequest,
    RequestStatus, ShortageDecision, ShortageEntry, ShortageSource, ShortageStatus,
};
pub use value_objects::{DiscountRate, Money};
