use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{OrderId, OrderLineId, ShipmentId};
use domain::{
    Allocation, FulfillmentEvent, Order, OrderError, OrderStatus, OrderTransition, Shipment,
    ShipmentLine, apportion_receipt,
};
use store::Store;

use super::{FulfillmentService, ReceiptRequest, lock_order, observe, pairs};
use crate::error::{FulfillmentError, Result};
use crate::notifier::Notifier;

impl<S, N> FulfillmentService<S, N>
where
    S: Store,
    N: Notifier,
{
    /// Confirms goods received, either a whole shipment or per order line.
    ///
    /// Line quantities are spread over the line's shipments oldest first, so
    /// the outcome never depends on the order of the request.
    #[tracing::instrument(skip(self, request))]
    pub async fn confirm_receipt(&self, order_id: OrderId, request: ReceiptRequest) -> Result<Order> {
        let started = Instant::now();
        let mut uow = self.store.begin().await?;
        let mut order = lock_order(uow.as_mut(), order_id).await?;

        if order.status != OrderStatus::Delivering {
            return Err(FulfillmentError::invalid_state(
                "order",
                order_id,
                order.status,
                "confirm receipt",
            ));
        }

        let mut shipments = uow.list_shipments(order_id).await?;
        let allocations = match request {
            ReceiptRequest::Shipment { shipment_id } => {
                let shipment = shipments
                    .iter()
                    .find(|s| s.id == shipment_id)
                    .ok_or_else(|| FulfillmentError::not_found("shipment", shipment_id))?;
                pending_on(shipment)
            }
            ReceiptRequest::Lines { lines } => {
                let wanted = order
                    .plan_receipt(&pairs(&lines))
                    .map_err(|e| FulfillmentError::order(order_id, e))?;
                let all_lines: Vec<ShipmentLine> = shipments
                    .iter()
                    .flat_map(|s| s.lines.iter().cloned())
                    .collect();
                let mut allocations = Vec::new();
                for (line_id, quantity) in wanted {
                    let split = apportion_receipt(&all_lines, line_id, quantity)
                        .map_err(|e| FulfillmentError::order(order_id, e))?;
                    allocations.extend(split.into_iter().map(|a| (line_id, a)));
                }
                allocations
            }
        };
        if allocations.is_empty() {
            return Err(FulfillmentError::InvalidQuantity(OrderError::NothingToReceive));
        }

        let now = Utc::now();
        let mut per_line: BTreeMap<OrderLineId, u32> = BTreeMap::new();
        let mut touched: Vec<ShipmentId> = Vec::new();
        for (line_id, allocation) in &allocations {
            apply(&mut shipments, allocation, now)
                .map_err(|e| FulfillmentError::order(order_id, e))?;
            *per_line.entry(*line_id).or_insert(0) += allocation.quantity;
            if !touched.contains(&allocation.shipment_id) {
                touched.push(allocation.shipment_id);
            }
        }
        for (&line_id, &quantity) in &per_line {
            order
                .record_receipt(line_id, quantity)
                .map_err(|e| FulfillmentError::order(order_id, e))?;
        }

        for shipment in shipments.iter_mut().filter(|s| touched.contains(&s.id)) {
            shipment.refresh_status();
            uow.save_shipment(shipment).await?;
        }

        let fully_received = order.is_fully_received();
        let paid = order.is_paid();
        let next = order
            .transition(OrderTransition::Receive {
                fully_received,
                paid,
            })
            .map_err(|e| FulfillmentError::order(order_id, e))?;
        uow.save_order(&order).await?;

        let units: u64 = per_line.values().map(|&q| u64::from(q)).sum();
        uow.record_event(&FulfillmentEvent::ReceiptConfirmed { order_id, units })
            .await?;
        if next == OrderStatus::Completed {
            uow.record_event(&FulfillmentEvent::OrderCompleted { order_id })
                .await?;
        }
        uow.commit().await?;

        metrics::counter!("receipts_confirmed_total").increment(1);
        observe("confirm_receipt", started);
        tracing::info!(units, status = %order.status, "receipt confirmed");
        Ok(order)
    }
}

/// Everything still pending on one shipment.
fn pending_on(shipment: &Shipment) -> Vec<(OrderLineId, Allocation)> {
    shipment
        .lines
        .iter()
        .filter(|l| l.pending_quantity() > 0)
        .map(|l| {
            (
                l.order_line_id,
                Allocation {
                    shipment_id: shipment.id,
                    shipment_line_id: l.id,
                    quantity: l.pending_quantity(),
                },
            )
        })
        .collect()
}

fn apply(
    shipments: &mut [Shipment],
    allocation: &Allocation,
    at: DateTime<Utc>,
) -> std::result::Result<(), OrderError> {
    let line = shipments
        .iter_mut()
        .filter(|s| s.id == allocation.shipment_id)
        .flat_map(|s| s.lines.iter_mut())
        .find(|l| l.id == allocation.shipment_line_id);
    match line {
        Some(line) => line.receive(allocation.quantity, at),
        None => Err(OrderError::NothingToReceive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ShipmentLineId;
    use domain::{ReceiveStatus, ShipmentStatus};

    fn shipment(id: i64, lines: &[(i64, i64, u32, u32)]) -> Shipment {
        Shipment {
            id: ShipmentId::new(id),
            order_id: OrderId::new(1),
            ship_time: Utc::now(),
            carrier: "Post".to_string(),
            tracking_number: format!("T{id}"),
            status: ShipmentStatus::Shipped,
            operator: "ops".to_string(),
            lines: lines
                .iter()
                .map(|&(line_id, order_line, shipped, received)| ShipmentLine {
                    id: ShipmentLineId::new(line_id),
                    shipment_id: ShipmentId::new(id),
                    order_line_id: OrderLineId::new(order_line),
                    ship_quantity: shipped,
                    receive_status: if shipped == received {
                        ReceiveStatus::Received
                    } else {
                        ReceiveStatus::Pending
                    },
                    received_quantity: received,
                    received_time: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_pending_on_skips_received_lines() {
        let s = shipment(4, &[(1, 10, 2, 2), (2, 11, 5, 1)]);

        let pending = pending_on(&s);

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, OrderLineId::new(11));
        assert_eq!(pending[0].1.quantity, 4);
    }

    #[test]
    fn test_apply_receives_the_allocated_line() {
        let mut shipments = vec![shipment(1, &[(1, 10, 3, 0)]), shipment(2, &[(2, 10, 5, 0)])];
        let allocation = Allocation {
            shipment_id: ShipmentId::new(2),
            shipment_line_id: ShipmentLineId::new(2),
            quantity: 5,
        };

        apply(&mut shipments, &allocation, Utc::now()).unwrap();

        assert_eq!(shipments[0].lines[0].received_quantity, 0);
        assert_eq!(shipments[1].lines[0].receive_status, ReceiveStatus::Received);
    }

    #[test]
    fn test_apply_unknown_line_fails() {
        let mut shipments = vec![shipment(1, &[(1, 10, 3, 0)])];
        let allocation = Allocation {
            shipment_id: ShipmentId::new(1),
            shipment_line_id: ShipmentLineId::new(9),
            quantity: 1,
        };

        assert!(apply(&mut shipments, &allocation, Utc::now()).is_err());
    }
}
