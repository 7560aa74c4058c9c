//! Order & fulfillment orchestrator.
//!
//! Every public operation runs in exactly one unit of work: either all of its
//! effects commit or none do. Notifications go out after the commit and never
//! fail the operation.

mod checkout;
mod payment;
mod receipt;
mod review;
mod shipping;

use std::time::Instant;

use common::{BookId, CustomerId, OrderId, OrderLineId, ShipmentId, ShortageRequestId};
use domain::{
    CustomerShortageRequest, Order, Shipment, ShortageEntry, ShortageStatus,
};
use serde::{Deserialize, Serialize};
use store::{RecordedEvent, Store, UnitOfWork};

use crate::error::{FulfillmentError, Result};
use crate::notifier::{Notification, Notifier};

/// One requested book at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub book_id: BookId,
    pub quantity: u32,
}

/// Checkout request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrder {
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    /// Falls back to the customer's name.
    pub shipping_address: Option<String>,
    pub note: Option<String>,
}

/// A quantity against one order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineQuantity {
    pub order_line_id: OrderLineId,
    pub quantity: u32,
}

/// A partial shipment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentRequest {
    pub lines: Vec<LineQuantity>,
    pub carrier: String,
    pub tracking_number: String,
    pub operator: String,
}

/// What a receipt confirmation covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum ReceiptRequest {
    /// Everything still pending on one shipment.
    Shipment { shipment_id: ShipmentId },
    /// Quantities per order line, apportioned oldest shipment first.
    Lines { lines: Vec<LineQuantity> },
}

/// An order together with everything hanging off it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub shipments: Vec<Shipment>,
    pub shortage_requests: Vec<CustomerShortageRequest>,
}

/// Result of a shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShipmentOutcome {
    pub order: Order,
    pub shipment: Shipment,
}

/// Coordinates checkout, shortage decisions, payment, shipment and receipt.
pub struct FulfillmentService<S, N>
where
    S: Store,
    N: Notifier,
{
    store: S,
    notifier: N,
}

impl<S, N> FulfillmentService<S, N>
where
    S: Store,
    N: Notifier,
{
    pub fn new(store: S, notifier: N) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Loads an order with its shipments and shortage requests.
    pub async fn order_detail(&self, order_id: OrderId) -> Result<OrderDetail> {
        let mut uow = self.store.begin().await?;
        let order = uow
            .get_order(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("order", order_id))?;
        let shipments = uow.list_shipments(order_id).await?;
        let shortage_requests = uow.list_requests_for_order(order_id).await?;
        Ok(OrderDetail {
            order,
            shipments,
            shortage_requests,
        })
    }

    /// Outbox events of an order in commit order.
    pub async fn order_events(&self, order_id: OrderId) -> Result<Vec<RecordedEvent>> {
        let mut uow = self.store.begin().await?;
        if uow.get_order(order_id).await?.is_none() {
            return Err(FulfillmentError::not_found("order", order_id));
        }
        Ok(uow.list_events(order_id).await?)
    }

    /// Customer shortage requests awaiting an administrator.
    pub async fn list_pending_requests(&self) -> Result<Vec<CustomerShortageRequest>> {
        let mut uow = self.store.begin().await?;
        Ok(uow.list_pending_requests().await?)
    }

    /// Backlog entries, highest priority first.
    pub async fn list_shortages(
        &self,
        status: Option<ShortageStatus>,
    ) -> Result<Vec<ShortageEntry>> {
        let mut uow = self.store.begin().await?;
        Ok(uow.list_shortages(status).await?)
    }

    /// Sends a notification, logging instead of failing.
    async fn deliver(&self, notification: Notification) -> bool {
        let kind = notification.kind;
        let order_id = notification.order_id;
        match self.notifier.notify(notification).await {
            Ok(()) => true,
            Err(e) => {
                metrics::counter!("notifications_failed_total").increment(1);
                tracing::warn!(%order_id, kind = kind.as_str(), error = %e, "notification not delivered");
                false
            }
        }
    }

    /// Delivers a decision notification and flags the requests as notified.
    async fn notify_requests(&self, notification: Notification, request_ids: &[ShortageRequestId]) {
        if !self.deliver(notification).await || request_ids.is_empty() {
            return;
        }
        if let Err(e) = self.mark_notified(request_ids).await {
            tracing::warn!(error = %e, "could not flag shortage requests as notified");
        }
    }

    async fn mark_notified(&self, request_ids: &[ShortageRequestId]) -> Result<()> {
        let mut uow = self.store.begin().await?;
        for &id in request_ids {
            if let Some(mut request) = uow.get_shortage_request(id).await? {
                request.notified = true;
                uow.update_shortage_request(&request).await?;
            }
        }
        uow.commit().await?;
        Ok(())
    }
}

/// Loads and locks an order for the rest of the unit of work.
async fn lock_order(uow: &mut dyn UnitOfWork, order_id: OrderId) -> Result<Order> {
    uow.lock_order(order_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("order", order_id))
}

fn pairs(lines: &[LineQuantity]) -> Vec<(OrderLineId, u32)> {
    lines
        .iter()
        .map(|l| (l.order_line_id, l.quantity))
        .collect()
}

fn observe(operation: &'static str, started: Instant) {
    metrics::histogram!("fulfillment_operation_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}
