//! Events recorded in the outbox for every committed engine operation.

use common::{
    BookId, CreditTierId, CustomerId, OrderId, PurchaseOrderId, ShipmentId, ShortageEntryId,
    ShortageRequestId,
};
use serde::{Deserialize, Serialize};

use crate::shortage::ShortageSource;
use crate::value_objects::Money;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FulfillmentEvent {
    OrderPlaced {
        order_id: OrderId,
        customer_id: CustomerId,
        payable_amount: Money,
        line_count: usize,
    },

    /// Customer chose to register a shortage and wait for review.
    ShortageRegistered {
        order_id: OrderId,
        request_ids: Vec<ShortageRequestId>,
    },

    ShortageAccepted {
        order_id: OrderId,
        request_id: ShortageRequestId,
        entry_id: ShortageEntryId,
    },

    ShortageRejected {
        order_id: OrderId,
        request_id: ShortageRequestId,
    },

    PaymentCaptured {
        order_id: OrderId,
        customer_id: CustomerId,
        amount: Money,
        balance_after: Money,
    },

    TierUpgraded {
        order_id: OrderId,
        customer_id: CustomerId,
        from: CreditTierId,
        to: CreditTierId,
    },

    ShipmentDispatched {
        order_id: OrderId,
        shipment_id: ShipmentId,
        units: u64,
        before_payment: bool,
    },

    ReceiptConfirmed {
        order_id: OrderId,
        units: u64,
    },

    OrderCompleted {
        order_id: OrderId,
    },

    OrderCancelled {
        order_id: OrderId,
        reason: String,
    },

    BacklogRaised {
        entry_id: ShortageEntryId,
        book_id: BookId,
        quantity: u32,
        source: ShortageSource,
    },

    PurchaseIssued {
        purchase_order_id: PurchaseOrderId,
        entry_ids: Vec<ShortageEntryId>,
        estimated_amount: Money,
    },

    GoodsReceived {
        purchase_order_id: PurchaseOrderId,
        units: u64,
    },
}

impl FulfillmentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            FulfillmentEvent::OrderPlaced { .. } => "OrderPlaced",
            FulfillmentEvent::ShortageRegistered { .. } => "ShortageRegistered",
            FulfillmentEvent::ShortageAccepted { .. } => "ShortageAccepted",
            FulfillmentEvent::ShortageRejected { .. } => "ShortageRejected",
            FulfillmentEvent::PaymentCaptured { .. } => "PaymentCaptured",
            FulfillmentEvent::TierUpgraded { .. } => "TierUpgraded",
            FulfillmentEvent::ShipmentDispatched { .. } => "ShipmentDispatched",
            FulfillmentEvent::ReceiptConfirmed { .. } => "ReceiptConfirmed",
            FulfillmentEvent::OrderCompleted { .. } => "OrderCompleted",
            FulfillmentEvent::OrderCancelled { .. } => "OrderCancelled",
            FulfillmentEvent::BacklogRaised { .. } => "BacklogRaised",
            FulfillmentEvent::PurchaseIssued { .. } => "PurchaseIssued",
            FulfillmentEvent::GoodsReceived { .. } => "GoodsReceived",
        }
    }

    /// The order the event belongs to, if any.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            FulfillmentEvent::OrderPlaced { order_id, .. }
            | FulfillmentEvent::ShortageRegistered { order_id, .. }
            | FulfillmentEvent::ShortageAccepted { order_id, .. }
            | FulfillmentEvent::ShortageRejected { order_id, .. }
            | FulfillmentEvent::PaymentCaptured { order_id, .. }
            | FulfillmentEvent::TierUpgraded { order_id, .. }
            | FulfillmentEvent::ShipmentDispatched { order_id, .. }
            | FulfillmentEvent::ReceiptConfirmed { order_id, .. }
            | FulfillmentEvent::OrderCompleted { order_id }
            | FulfillmentEvent::OrderCancelled { order_id, .. } => Some(*order_id),
            FulfillmentEvent::BacklogRaised { .. }
            | FulfillmentEvent::PurchaseIssued { .. }
            | FulfillmentEvent::GoodsReceived { .. } => None,
        }
    }
}
