use std::time::Instant;

use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{FulfillmentEvent, NewShortage, Order, OrderStatus, OrderTransition, RequestStatus};
use store::{Store, UnitOfWork};

use super::{FulfillmentService, lock_order, observe};
use crate::backlog::ShortageBacklog;
use crate::error::{FulfillmentError, Result};
use crate::notifier::Notifier;
use crate::settlement::SettlementAuthorizer;

impl<S, N> FulfillmentService<S, N>
where
    S: Store,
    N: Notifier,
{
    /// Charges the order's payable amount to the customer.
    ///
    /// A declined payment leaves the order untouched.
    #[tracing::instrument(skip(self))]
    pub async fn pay(&self, order_id: OrderId) -> Result<Order> {
        let started = Instant::now();
        let mut uow = self.store.begin().await?;
        let mut order = lock_order(uow.as_mut(), order_id).await?;

        settle(uow.as_mut(), &mut order, Utc::now()).await?;
        uow.commit().await?;

        observe("pay", started);
        tracing::info!(amount = %order.payable_amount, status = %order.status, "order paid");
        Ok(order)
    }
}

/// Charges the order and moves it on, inside the caller's unit of work.
///
/// Shortage requests still PENDING for the order are accepted with a fresh
/// backlog entry; every accepted request is flagged as paid.
pub(super) async fn settle(
    uow: &mut dyn UnitOfWork,
    order: &mut Order,
    now: DateTime<Utc>,
) -> Result<()> {
    if !order.status.can_pay() || order.is_paid() {
        return Err(FulfillmentError::invalid_state(
            "order",
            order.id,
            order.status,
            "pay",
        ));
    }

    let settlement =
        SettlementAuthorizer::authorize_and_charge(uow, order.customer_id, order.payable_amount)
            .await?;

    for mut request in uow.list_requests_for_order(order.id).await? {
        match request.status {
            RequestStatus::Pending => {
                let entry = ShortageBacklog::raise(
                    uow,
                    NewShortage::customer_request(
                        request.book_id.clone(),
                        request.requested_qty,
                        request.customer_id,
                        now.date_naive(),
                    ),
                )
                .await?;
                request.accept(entry.id, now);
                uow.record_event(&FulfillmentEvent::ShortageAccepted {
                    order_id: order.id,
                    request_id: request.id,
                    entry_id: entry.id,
                })
                .await?;
            }
            RequestStatus::Accepted if !request.paid => {}
            _ => continue,
        }
        request.paid = true;
        uow.update_shortage_request(&request).await?;
    }

    let fully_received = order.is_fully_received();
    let next = order
        .transition(OrderTransition::Settle { fully_received })
        .map_err(|e| FulfillmentError::order(order.id, e))?;
    order.payment_time = Some(now);
    uow.save_order(order).await?;

    uow.record_event(&FulfillmentEvent::PaymentCaptured {
        order_id: order.id,
        customer_id: order.customer_id,
        amount: order.payable_amount,
        balance_after: settlement.customer.balance,
    })
    .await?;
    if let Some(upgraded) = &settlement.upgraded_to {
        uow.record_event(&FulfillmentEvent::TierUpgraded {
            order_id: order.id,
            customer_id: order.customer_id,
            from: settlement.previous_tier.id,
            to: upgraded.id,
        })
        .await?;
    }
    if next == OrderStatus::Completed {
        uow.record_event(&FulfillmentEvent::OrderCompleted { order_id: order.id })
            .await?;
    }
    Ok(())
}
