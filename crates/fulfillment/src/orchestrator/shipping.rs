use std::time::Instant;

use chrono::Utc;
use common::OrderId;
use domain::{
    FulfillmentEvent, NewShipment, Order, OrderStatus, OrderTransition, ShipmentPlan,
    can_ship_before_payment,
};
use store::Store;

use super::{FulfillmentService, ShipmentOutcome, ShipmentRequest, lock_order, observe, pairs};
use crate::error::{FulfillmentError, Result};
use crate::inventory::InventoryLedger;
use crate::notifier::{Notification, NotificationKind, Notifier};
use crate::settlement::SettlementAuthorizer;

/// Shipment destination and paperwork.
struct Dispatch {
    carrier: String,
    tracking_number: String,
    operator: String,
}

impl<S, N> FulfillmentService<S, N>
where
    S: Store,
    N: Notifier,
{
    /// Ships the requested quantities per order line.
    ///
    /// All or nothing: if any book is short the whole shipment is refused and
    /// the error lists every short book.
    #[tracing::instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub async fn ship(&self, order_id: OrderId, request: ShipmentRequest) -> Result<ShipmentOutcome> {
        let requested = pairs(&request.lines);
        let dispatch = Dispatch {
            carrier: request.carrier,
            tracking_number: request.tracking_number,
            operator: request.operator,
        };
        self.dispatch(order_id, dispatch, |order| order.plan_shipment(&requested))
            .await
    }

    /// Ships every unit not shipped yet, through the same path as [`ship`].
    ///
    /// [`ship`]: FulfillmentService::ship
    #[tracing::instrument(skip(self, carrier, tracking_number, operator))]
    pub async fn ship_all(
        &self,
        order_id: OrderId,
        carrier: String,
        tracking_number: String,
        operator: String,
    ) -> Result<ShipmentOutcome> {
        let dispatch = Dispatch {
            carrier,
            tracking_number,
            operator,
        };
        self.dispatch(order_id, dispatch, Order::plan_full_shipment)
            .await
    }

    async fn dispatch<F>(
        &self,
        order_id: OrderId,
        dispatch: Dispatch,
        plan: F,
    ) -> Result<ShipmentOutcome>
    where
        F: FnOnce(&Order) -> std::result::Result<ShipmentPlan, domain::OrderError>,
    {
        let started = Instant::now();
        let mut uow = self.store.begin().await?;
        let mut order = lock_order(uow.as_mut(), order_id).await?;

        let customer = uow
            .get_customer(order.customer_id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("customer", order.customer_id))?;
        let tier = SettlementAuthorizer::tier_of(uow.as_mut(), &customer).await?;

        let ship_before_pay = can_ship_before_payment(&order, &tier);
        if !ship_before_pay
            && !matches!(
                order.status,
                OrderStatus::PendingShipment | OrderStatus::Delivering
            )
        {
            metrics::counter!("shipments_rejected_total", "reason" => "invalid_state").increment(1);
            return Err(FulfillmentError::invalid_state(
                "order",
                order_id,
                order.status,
                "ship",
            ));
        }

        let plan = plan(&order).map_err(|e| FulfillmentError::order(order_id, e))?;
        let per_book = plan
            .per_book()
            .map_err(|e| FulfillmentError::order(order_id, e))?;

        let shortfalls = InventoryLedger::shortfalls(uow.as_mut(), per_book.clone()).await?;
        if !shortfalls.is_empty() {
            metrics::counter!("shipments_rejected_total", "reason" => "insufficient_stock")
                .increment(1);
            tracing::warn!(short_books = shortfalls.len(), "shipment refused");
            return Err(FulfillmentError::InsufficientStock { shortfalls });
        }

        let now = Utc::now();
        for (book_id, quantity) in &per_book {
            InventoryLedger::decrease(uow.as_mut(), book_id, *quantity, now.date_naive()).await?;
        }

        order
            .apply_shipment(&plan)
            .map_err(|e| FulfillmentError::order(order_id, e))?;
        order
            .transition(OrderTransition::Dispatch { ship_before_pay })
            .map_err(|e| FulfillmentError::order(order_id, e))?;
        order.delivery_time = Some(now);
        uow.save_order(&order).await?;

        let shipment = uow
            .insert_shipment(NewShipment::from_plan(
                order_id,
                &plan,
                dispatch.carrier,
                dispatch.tracking_number,
                dispatch.operator,
                now,
            ))
            .await?;
        uow.record_event(&FulfillmentEvent::ShipmentDispatched {
            order_id,
            shipment_id: shipment.id,
            units: plan.total_units(),
            before_payment: ship_before_pay,
        })
        .await?;
        uow.commit().await?;

        metrics::counter!("shipments_created_total").increment(1);
        observe("ship", started);
        tracing::info!(shipment_id = %shipment.id, units = plan.total_units(), ship_before_pay, "shipment dispatched");

        self.deliver(shipment_notice(&order, &plan)).await;
        Ok(ShipmentOutcome { order, shipment })
    }
}

fn shipment_notice(order: &Order, plan: &ShipmentPlan) -> Notification {
    let shipped: Vec<String> = plan
        .lines()
        .iter()
        .map(|l| format!("{} x{}", l.book_id, l.quantity))
        .collect();
    let unshipped: Vec<String> = order
        .lines
        .iter()
        .filter(|l| l.remaining_to_ship() > 0)
        .map(|l| format!("{} x{}", l.book_id, l.remaining_to_ship()))
        .collect();

    let (kind, title) = if unshipped.is_empty() {
        (NotificationKind::Shipped, format!("Order {} shipped", order.id))
    } else {
        (
            NotificationKind::PartialShipment,
            format!("Order {} partially shipped", order.id),
        )
    };
    let mut body = format!("Shipped: {}.", shipped.join(", "));
    if !unshipped.is_empty() {
        body.push_str(&format!(" Still to ship: {}.", unshipped.join(", ")));
    }

    Notification {
        customer_id: order.customer_id,
        order_id: order.id,
        kind,
        title,
        body,
    }
}
