use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{BookId, OrderId, ShortageRequestId};
use domain::{
    CustomerShortageRequest, DEFAULT_PRIORITY, FulfillmentEvent, NewShortage, Order, OrderError,
    OrderStatus, OrderTransition, ShortageEntry, ShortageSource,
};
use store::{Store, UnitOfWork};

use super::{FulfillmentService, lock_order, observe};
use crate::backlog::ShortageBacklog;
use crate::error::{FulfillmentError, Result};
use crate::notifier::{Notification, NotificationKind, Notifier};

impl<S, N> FulfillmentService<S, N>
where
    S: Store,
    N: Notifier,
{
    /// Accepts a pending customer shortage request and registers the shortage.
    ///
    /// Once no request of the order is pending any more, an order parked in
    /// OUT_OF_STOCK_PENDING goes back to PENDING_PAYMENT.
    #[tracing::instrument(skip(self))]
    pub async fn accept_shortage_request(&self, request_id: ShortageRequestId) -> Result<Order> {
        let started = Instant::now();
        let mut uow = self.store.begin().await?;
        let (mut order, mut request) = lock_pending_request(uow.as_mut(), request_id, "accept").await?;

        let now = Utc::now();
        let entry = ShortageBacklog::raise(
            uow.as_mut(),
            NewShortage::customer_request(
                request.book_id.clone(),
                request.requested_qty,
                request.customer_id,
                now.date_naive(),
            ),
        )
        .await?;
        request.accept(entry.id, now);
        uow.update_shortage_request(&request).await?;
        uow.record_event(&FulfillmentEvent::ShortageAccepted {
            order_id: order.id,
            request_id,
            entry_id: entry.id,
        })
        .await?;

        let still_pending = uow
            .list_requests_for_order(order.id)
            .await?
            .iter()
            .any(CustomerShortageRequest::is_pending);
        if !still_pending && order.status == OrderStatus::OutOfStockPending {
            order
                .transition(OrderTransition::ReleaseShortageHold)
                .map_err(|e| FulfillmentError::order(order.id, e))?;
            uow.save_order(&order).await?;
        }
        uow.commit().await?;

        observe("accept_shortage_request", started);
        tracing::info!(order_id = %order.id, entry_id = %entry.id, "shortage request accepted");

        let notice = Notification {
            customer_id: order.customer_id,
            order_id: order.id,
            kind: NotificationKind::ShortageAccepted,
            title: format!("Shortage request for order {} accepted", order.id),
            body: format!(
                "{} x{} has been registered for procurement. You can now pay for the order.",
                request.book_id, request.requested_qty
            ),
        };
        self.notify_requests(notice, &[request_id]).await;
        Ok(order)
    }

    /// Rejects a pending customer shortage request and cancels its order.
    ///
    /// Every other pending request of the order is rejected along with it.
    #[tracing::instrument(skip(self))]
    pub async fn reject_shortage_request(&self, request_id: ShortageRequestId) -> Result<Order> {
        let started = Instant::now();
        let mut uow = self.store.begin().await?;
        let (mut order, _) = lock_pending_request(uow.as_mut(), request_id, "reject").await?;

        order
            .transition(OrderTransition::RejectShortage)
            .map_err(|e| FulfillmentError::order(order.id, e))?;
        let now = Utc::now();
        let rejected = reject_pending(uow.as_mut(), order.id, now).await?;
        uow.save_order(&order).await?;
        uow.record_event(&FulfillmentEvent::OrderCancelled {
            order_id: order.id,
            reason: "shortage request rejected".to_string(),
        })
        .await?;
        uow.commit().await?;

        observe("reject_shortage_request", started);
        tracing::info!(order_id = %order.id, rejected = rejected.len(), "shortage request rejected");

        let notice = Notification {
            customer_id: order.customer_id,
            order_id: order.id,
            kind: NotificationKind::ShortageRejected,
            title: format!("Shortage request for order {} rejected", order.id),
            body: "The missing items cannot be procured. The order has been cancelled.".to_string(),
        };
        self.notify_requests(notice, &rejected).await;
        Ok(order)
    }

    /// Cancels an order that has not shipped anything yet.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order> {
        let mut uow = self.store.begin().await?;
        let mut order = lock_order(uow.as_mut(), order_id).await?;

        let shipped_any = order.has_shipped_any();
        order
            .transition(OrderTransition::Cancel { shipped_any })
            .map_err(|e| FulfillmentError::order(order_id, e))?;
        let rejected = reject_pending(uow.as_mut(), order_id, Utc::now()).await?;
        uow.save_order(&order).await?;
        uow.record_event(&FulfillmentEvent::OrderCancelled {
            order_id,
            reason: "cancelled by customer".to_string(),
        })
        .await?;
        uow.commit().await?;

        tracing::info!(rejected_requests = rejected.len(), "order cancelled");
        Ok(order)
    }

    /// Raises a MANUAL backlog entry.
    #[tracing::instrument(skip(self))]
    pub async fn raise_manual_shortage(
        &self,
        book_id: BookId,
        quantity: u32,
        priority: Option<i32>,
    ) -> Result<ShortageEntry> {
        if quantity == 0 {
            return Err(FulfillmentError::InvalidQuantity(
                OrderError::InvalidQuantity { book_id, quantity },
            ));
        }
        let mut uow = self.store.begin().await?;
        if uow.get_book(&book_id).await?.is_none() {
            return Err(FulfillmentError::not_found("book", &book_id));
        }

        let raise = NewShortage::new(book_id, quantity, ShortageSource::Manual, Utc::now().date_naive())
            .with_priority(priority.unwrap_or(DEFAULT_PRIORITY));
        let entry = ShortageBacklog::raise(uow.as_mut(), raise).await?;
        uow.commit().await?;
        Ok(entry)
    }
}

/// Locks the request's order, then re-reads the request under that lock.
async fn lock_pending_request(
    uow: &mut dyn UnitOfWork,
    request_id: ShortageRequestId,
    action: &str,
) -> Result<(Order, CustomerShortageRequest)> {
    let order_id = uow
        .get_shortage_request(request_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("shortage request", request_id))?
        .order_id;
    let order = lock_order(uow, order_id).await?;

    let request = uow
        .get_shortage_request(request_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("shortage request", request_id))?;
    if !request.is_pending() {
        return Err(FulfillmentError::invalid_state(
            "shortage request",
            request_id,
            request.status.as_str(),
            action,
        ));
    }
    Ok((order, request))
}

/// Rejects every pending request of the order and returns their ids.
async fn reject_pending(
    uow: &mut dyn UnitOfWork,
    order_id: OrderId,
    now: DateTime<Utc>,
) -> Result<Vec<ShortageRequestId>> {
    let mut rejected = Vec::new();
    for mut request in uow.list_requests_for_order(order_id).await? {
        if !request.is_pending() {
            continue;
        }
        request.reject(now);
        uow.update_shortage_request(&request).await?;
        uow.record_event(&FulfillmentEvent::ShortageRejected {
            order_id,
            request_id: request.id,
        })
        .await?;
        rejected.push(request.id);
    }
    Ok(rejected)
}
