use std::time::Instant;

use chrono::Utc;
use common::OrderId;
use domain::{
    FulfillmentEvent, LineShortage, NewOrder, NewShortage, NewShortageRequest, Order,
    OrderTransition, OrderStatus, PricedItem, RequestStatus, ShortageDecision,
};
use store::{Store, UnitOfWork};

use super::{CreateOrder, FulfillmentService, lock_order, observe, payment};
use crate::backlog::ShortageBacklog;
use crate::error::{FulfillmentError, Result};
use crate::inventory::InventoryLedger;
use crate::notifier::Notifier;
use crate::settlement::SettlementAuthorizer;

impl<S, N> FulfillmentService<S, N>
where
    S: Store,
    N: Notifier,
{
    /// Creates an order priced at the customer's current tier discount.
    #[tracing::instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn create_order(&self, request: CreateOrder) -> Result<Order> {
        let started = Instant::now();
        let mut uow = self.store.begin().await?;

        let customer = uow
            .get_customer(request.customer_id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("customer", request.customer_id))?;
        if !customer.is_active() {
            return Err(FulfillmentError::invalid_state(
                "customer",
                customer.id,
                customer.status.as_str(),
                "check out",
            ));
        }
        let tier = SettlementAuthorizer::tier_of(uow.as_mut(), &customer).await?;

        let mut items = Vec::with_capacity(request.items.len());
        for item in request.items {
            let book = uow
                .get_book(&item.book_id)
                .await?
                .ok_or_else(|| FulfillmentError::not_found("book", &item.book_id))?;
            items.push(PricedItem {
                book_id: book.id,
                list_price: book.list_price,
                quantity: item.quantity,
            });
        }

        let new_order = NewOrder::checkout(
            &customer,
            &tier,
            items,
            request.shipping_address,
            request.note,
            Utc::now(),
        )
        .map_err(FulfillmentError::InvalidQuantity)?;
        let order = uow.insert_order(new_order).await?;

        uow.record_event(&FulfillmentEvent::OrderPlaced {
            order_id: order.id,
            customer_id: order.customer_id,
            payable_amount: order.payable_amount,
            line_count: order.lines.len(),
        })
        .await?;
        uow.commit().await?;

        metrics::counter!("orders_created_total").increment(1);
        observe("create_order", started);
        tracing::info!(order_id = %order.id, payable = %order.payable_amount, "order created");
        Ok(order)
    }

    /// Lines whose remaining quantity exceeds the stock on hand.
    pub async fn list_shortages_for_order(&self, order_id: OrderId) -> Result<Vec<LineShortage>> {
        let mut uow = self.store.begin().await?;
        let order = uow
            .get_order(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("order", order_id))?;
        detect_shortages(uow.as_mut(), &order).await
    }

    /// Records the customer's answer to a shortage on a PENDING_PAYMENT order.
    ///
    /// Pay-and-register raises the backlog entries and pays in the same unit
    /// of work, so a declined payment leaves no request or entry behind.
    /// Register-only parks the order in OUT_OF_STOCK_PENDING.
    #[tracing::instrument(skip(self, note))]
    pub async fn decide_shortage(
        &self,
        order_id: OrderId,
        decision: ShortageDecision,
        note: Option<String>,
    ) -> Result<Order> {
        let started = Instant::now();
        let mut uow = self.store.begin().await?;
        let mut order = lock_order(uow.as_mut(), order_id).await?;

        if order.status != OrderStatus::PendingPayment {
            return Err(FulfillmentError::invalid_state(
                "order",
                order_id,
                order.status,
                "decide shortage",
            ));
        }
        let shortages = detect_shortages(uow.as_mut(), &order).await?;
        if shortages.is_empty() {
            return Err(FulfillmentError::invalid_state(
                "order",
                order_id,
                order.status,
                "decide shortage without a shortfall",
            ));
        }

        let now = Utc::now();
        let pay_now = decision == ShortageDecision::PayAndRegister;
        let mut request_ids = Vec::with_capacity(shortages.len());
        for shortage in &shortages {
            let requested_qty = order
                .line(shortage.order_line_id)
                .map_or(shortage.required, |line| line.quantity);

            let related_entry_id = if pay_now {
                let entry = ShortageBacklog::raise(
                    uow.as_mut(),
                    NewShortage::customer_request(
                        shortage.book_id.clone(),
                        requested_qty,
                        order.customer_id,
                        now.date_naive(),
                    ),
                )
                .await?;
                Some(entry.id)
            } else {
                None
            };

            let request = uow
                .insert_shortage_request(NewShortageRequest {
                    order_id,
                    customer_id: order.customer_id,
                    book_id: shortage.book_id.clone(),
                    requested_qty,
                    customer_note: note.clone(),
                    paid: pay_now,
                    status: if pay_now {
                        RequestStatus::Accepted
                    } else {
                        RequestStatus::Pending
                    },
                    related_entry_id,
                    notified: pay_now,
                    created_at: now,
                })
                .await?;
            request_ids.push(request.id);
        }

        uow.record_event(&FulfillmentEvent::ShortageRegistered {
            order_id,
            request_ids,
        })
        .await?;

        if pay_now {
            payment::settle(uow.as_mut(), &mut order, now).await?;
        } else {
            order
                .transition(OrderTransition::HoldForShortage)
                .map_err(|e| FulfillmentError::order(order_id, e))?;
            uow.save_order(&order).await?;
        }
        uow.commit().await?;

        observe("decide_shortage", started);
        tracing::info!(?decision, lines = shortages.len(), status = %order.status, "shortage decided");
        Ok(order)
    }
}

/// Compares every line still to ship against stock on hand.
pub(super) async fn detect_shortages(
    uow: &mut dyn UnitOfWork,
    order: &Order,
) -> Result<Vec<LineShortage>> {
    let mut shortages = Vec::new();
    for line in &order.lines {
        let required = line.remaining_to_ship();
        if required == 0 {
            continue;
        }
        let on_hand = InventoryLedger::quantity(uow, &line.book_id).await?;
        if on_hand < required {
            shortages.push(LineShortage {
                order_line_id: line.id,
                book_id: line.book_id.clone(),
                required,
                on_hand,
            });
        }
    }
    Ok(shortages)
}
