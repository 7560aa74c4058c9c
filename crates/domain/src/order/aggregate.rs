//! The sales order aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{BookId, CustomerId, OrderId, OrderLineId};
use serde::{Deserialize, Serialize};

use super::{LineStatus, OrderError, OrderLine, OrderStatus, OrderTransition};
use crate::credit::{CreditTier, Customer};
use crate::value_objects::{DiscountRate, Money};

/// A sales order with its lines.
///
/// Discount rate and shipping address are snapshots taken at checkout; later
/// tier changes never touch them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub goods_amount: Money,
    pub discount_rate: DiscountRate,
    pub payable_amount: Money,
    pub shipping_address: String,
    pub customer_note: Option<String>,
    pub order_time: DateTime<Utc>,
    pub payment_time: Option<DateTime<Utc>>,
    pub delivery_time: Option<DateTime<Utc>>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Moves the order through the state machine.
    pub fn transition(&mut self, transition: OrderTransition) -> Result<OrderStatus, OrderError> {
        let next = self.status.apply(transition)?;
        self.status = next;
        Ok(next)
    }

    pub fn is_paid(&self) -> bool {
        self.payment_time.is_some()
    }

    pub fn line(&self, id: OrderLineId) -> Option<&OrderLine> {
        self.lines.iter().find(|l| l.id == id)
    }

    fn line_mut(&mut self, id: OrderLineId) -> Result<&mut OrderLine, OrderError> {
        self.lines
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or(OrderError::LineNotFound { line_id: id })
    }

    pub fn has_shipped_any(&self) -> bool {
        self.lines.iter().any(|l| l.shipped_quantity > 0)
    }

    pub fn is_fully_received(&self) -> bool {
        self.lines.iter().all(OrderLine::is_fully_received)
    }

    /// Validates a partial shipment request against each line's remaining
    /// quantity. Repeated line ids are summed; zero quantities are ignored.
    pub fn plan_shipment(
        &self,
        requested: &[(OrderLineId, u32)],
    ) -> Result<ShipmentPlan, OrderError> {
        let wanted = collect_quantities(requested).map_err(|line_id| match self.line(line_id) {
            Some(line) => OrderError::ExceedsRemaining {
                line_id,
                requested: u32::MAX,
                remaining: line.remaining_to_ship(),
            },
            None => OrderError::LineNotFound { line_id },
        })?;
        for line_id in wanted.keys() {
            if self.line(*line_id).is_none() {
                return Err(OrderError::LineNotFound { line_id: *line_id });
            }
        }

        let mut lines = Vec::new();
        for line in &self.lines {
            let Some(&quantity) = wanted.get(&line.id) else {
                continue;
            };
            if quantity > line.remaining_to_ship() {
                return Err(OrderError::ExceedsRemaining {
                    line_id: line.id,
                    requested: quantity,
                    remaining: line.remaining_to_ship(),
                });
            }
            lines.push(PlannedLine {
                order_line_id: line.id,
                book_id: line.book_id.clone(),
                quantity,
            });
        }

        if lines.is_empty() {
            return Err(OrderError::NothingToShip);
        }
        Ok(ShipmentPlan { lines })
    }

    /// Plans a shipment of every unit not shipped yet.
    pub fn plan_full_shipment(&self) -> Result<ShipmentPlan, OrderError> {
        let requested: Vec<_> = self
            .lines
            .iter()
            .map(|l| (l.id, l.remaining_to_ship()))
            .collect();
        self.plan_shipment(&requested)
    }

    /// Bumps the shipped counters of the planned lines.
    pub fn apply_shipment(&mut self, plan: &ShipmentPlan) -> Result<(), OrderError> {
        for planned in &plan.lines {
            self.line_mut(planned.order_line_id)?
                .record_shipment(planned.quantity)?;
        }
        Ok(())
    }

    /// Validates a receipt request against each line's `shipped - received`.
    pub fn plan_receipt(
        &self,
        requested: &[(OrderLineId, u32)],
    ) -> Result<BTreeMap<OrderLineId, u32>, OrderError> {
        let wanted = collect_quantities(requested).map_err(|line_id| match self.line(line_id) {
            Some(line) => OrderError::ExceedsAwaiting {
                line_id,
                requested: u32::MAX,
                awaiting: line.awaiting_receipt(),
            },
            None => OrderError::LineNotFound { line_id },
        })?;
        for (&line_id, &quantity) in &wanted {
            let line = self
                .line(line_id)
                .ok_or(OrderError::LineNotFound { line_id })?;
            if quantity > line.awaiting_receipt() {
                return Err(OrderError::ExceedsAwaiting {
                    line_id,
                    requested: quantity,
                    awaiting: line.awaiting_receipt(),
                });
            }
        }
        if wanted.is_empty() {
            return Err(OrderError::NothingToReceive);
        }
        Ok(wanted)
    }

    pub fn record_receipt(&mut self, line_id: OrderLineId, quantity: u32) -> Result<(), OrderError> {
        self.line_mut(line_id)?.record_receipt(quantity)
    }
}

/// Sums the quantities per line. Fails with the line whose sum leaves `u32`.
fn collect_quantities(
    requested: &[(OrderLineId, u32)],
) -> Result<BTreeMap<OrderLineId, u32>, OrderLineId> {
    let mut wanted = BTreeMap::new();
    for &(line_id, quantity) in requested {
        if quantity > 0 {
            let sum: &mut u32 = wanted.entry(line_id).or_insert(0);
            *sum = sum.checked_add(quantity).ok_or(line_id)?;
        }
    }
    Ok(wanted)
}

/// Whether an unpaid order may ship because the customer's tier allows
/// overdraft.
///
/// Both the partial and the ship-everything paths go through this.
pub fn can_ship_before_payment(order: &Order, tier: &CreditTier) -> bool {
    order.status.awaits_payment() && !order.is_paid() && tier.allows_overdraft()
}

/// A validated shipment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentPlan {
    lines: Vec<PlannedLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLine {
    pub order_line_id: OrderLineId,
    pub book_id: BookId,
    pub quantity: u32,
}

impl ShipmentPlan {
    pub fn lines(&self) -> &[PlannedLine] {
        &self.lines
    }

    /// Units to take out of stock per book, in book order.
    pub fn per_book(&self) -> Result<BTreeMap<BookId, u32>, OrderError> {
        let mut books: BTreeMap<BookId, u32> = BTreeMap::new();
        for line in &self.lines {
            let sum = books.entry(line.book_id.clone()).or_insert(0);
            let current = *sum;
            *sum = current
                .checked_add(line.quantity)
                .ok_or_else(|| OrderError::QuantityOverflow {
                    book_id: line.book_id.clone(),
                    current,
                    added: line.quantity,
                })?;
        }
        Ok(books)
    }

    pub fn total_units(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }
}

/// A catalog entry priced at list price, as handed to checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedItem {
    pub book_id: BookId,
    pub list_price: Money,
    pub quantity: u32,
}

/// An order that has been priced but not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub customer_id: CustomerId,
    pub discount_rate: DiscountRate,
    pub shipping_address: String,
    pub customer_note: Option<String>,
    pub order_time: DateTime<Utc>,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderLine {
    pub book_id: BookId,
    pub quantity: u32,
    pub unit_price: Money,
    pub sub_amount: Money,
}

impl NewOrder {
    /// Prices a checkout at the customer's current tier discount.
    ///
    /// Without an address the customer's name is used as the shipping label.
    pub fn checkout(
        customer: &Customer,
        tier: &CreditTier,
        items: Vec<PricedItem>,
        shipping_address: Option<String>,
        customer_note: Option<String>,
        order_time: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    book_id: item.book_id,
                    quantity: 0,
                });
            }
            let unit_price = tier.discount_rate.apply(item.list_price);
            lines.push(NewOrderLine {
                book_id: item.book_id,
                quantity: item.quantity,
                unit_price,
                sub_amount: unit_price.multiply(item.quantity),
            });
        }

        let shipping_address = shipping_address
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| customer.name.clone());

        Ok(Self {
            customer_id: customer.id,
            discount_rate: tier.discount_rate,
            shipping_address,
            customer_note,
            order_time,
            lines,
        })
    }

    pub fn goods_amount(&self) -> Money {
        self.lines.iter().map(|l| l.sub_amount).sum()
    }

    /// Builds the stored order once the store has allocated keys.
    ///
    /// `line_ids` must hold one id per line, in line order.
    pub fn into_order(self, id: OrderId, line_ids: &[OrderLineId]) -> Order {
        let goods_amount = self.goods_amount();
        let lines = self
            .lines
            .into_iter()
            .zip(line_ids)
            .map(|(l, &line_id)| OrderLine {
                id: line_id,
                order_id: id,
                book_id: l.book_id,
                quantity: l.quantity,
                shipped_quantity: 0,
                received_quantity: 0,
                unit_price: l.unit_price,
                sub_amount: l.sub_amount,
                status: LineStatus::Ordered,
            })
            .collect();

        Order {
            id,
            customer_id: self.customer_id,
            status: OrderStatus::PendingPayment,
            goods_amount,
            discount_rate: self.discount_rate,
            payable_amount: goods_amount,
            shipping_address: self.shipping_address,
            customer_note: self.customer_note,
            order_time: self.order_time,
            payment_time: None,
            delivery_time: None,
            lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credit::{CustomerStatus, TierTable};
    use common::CreditTierId;

    fn customer() -> Customer {
        Customer {
            id: CustomerId::new(7),
            name: "Grace".to_string(),
            balance: Money::from_units(100),
            cumulative_spend: Money::zero(),
            credit_tier_id: CreditTierId::new(2),
            status: CustomerStatus::Active,
        }
    }

    fn tier(id: i64) -> CreditTier {
        TierTable::bookstore_default()
            .get(CreditTierId::new(id))
            .cloned()
            .unwrap()
    }

    fn order() -> Order {
        let items = vec![
            PricedItem {
                book_id: BookId::new("A"),
                list_price: Money::from_units(20),
                quantity: 10,
            },
            PricedItem {
                book_id: BookId::new("B"),
                list_price: Money::from_cents(3_333),
                quantity: 2,
            },
            PricedItem {
                book_id: BookId::new("A"),
                list_price: Money::from_units(20),
                quantity: 1,
            },
        ];
        NewOrder::checkout(&customer(), &tier(2), items, None, None, Utc::now())
            .unwrap()
            .into_order(
                OrderId::new(1),
                &[OrderLineId::new(11), OrderLineId::new(12), OrderLineId::new(13)],
            )
    }

    #[test]
    fn test_checkout_prices_at_tier_discount() {
        let order = order();

        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert_eq!(order.lines[0].unit_price, Money::from_units(17));
        assert_eq!(order.lines[1].unit_price, Money::from_cents(2_833));
        assert_eq!(order.goods_amount, Money::from_cents(170_00 + 56_66 + 17_00));
        assert_eq!(order.payable_amount, order.goods_amount);
        assert_eq!(order.shipping_address, "Grace");
    }

    #[test]
    fn test_checkout_rejects_empty_and_zero_quantity() {
        let err = NewOrder::checkout(&customer(), &tier(1), vec![], None, None, Utc::now());
        assert!(matches!(err, Err(OrderError::NoItems)));

        let items = vec![PricedItem {
            book_id: BookId::new("A"),
            list_price: Money::from_units(1),
            quantity: 0,
        }];
        let err = NewOrder::checkout(&customer(), &tier(1), items, None, None, Utc::now());
        assert!(matches!(err, Err(OrderError::InvalidQuantity { quantity: 0, .. })));
    }

    #[test]
    fn test_plan_shipment_aggregates_per_book() {
        let order = order();
        let plan = order
            .plan_shipment(&[
                (OrderLineId::new(11), 4),
                (OrderLineId::new(13), 1),
                (OrderLineId::new(12), 0),
            ])
            .unwrap();

        assert_eq!(plan.lines().len(), 2);
        assert_eq!(plan.per_book().unwrap().get(&BookId::new("A")), Some(&5));
        assert_eq!(plan.per_book().unwrap().get(&BookId::new("B")), None);
        assert_eq!(plan.total_units(), 5);
    }

    #[test]
    fn test_plan_shipment_sums_repeated_lines() {
        let order = order();
        let err = order
            .plan_shipment(&[(OrderLineId::new(12), 1), (OrderLineId::new(12), 2)])
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::ExceedsRemaining { requested: 3, remaining: 2, .. }
        ));
    }

    #[test]
    fn test_plan_shipment_rejects_repeated_lines_past_u32() {
        let order = order();
        let err = order
            .plan_shipment(&[(OrderLineId::new(11), u32::MAX), (OrderLineId::new(11), 2)])
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::ExceedsRemaining { requested: u32::MAX, remaining: 10, .. }
        ));
    }

    #[test]
    fn test_plan_receipt_rejects_repeated_lines_past_u32() {
        let mut order = order();
        let plan = order.plan_shipment(&[(OrderLineId::new(11), 3)]).unwrap();
        order.apply_shipment(&plan).unwrap();

        let err = order
            .plan_receipt(&[(OrderLineId::new(11), u32::MAX), (OrderLineId::new(11), 1)])
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::ExceedsAwaiting { requested: u32::MAX, awaiting: 3, .. }
        ));
    }

    #[test]
    fn test_plan_shipment_rejects_unknown_line_and_empty_request() {
        let order = order();
        assert!(matches!(
            order.plan_shipment(&[(OrderLineId::new(99), 1)]),
            Err(OrderError::LineNotFound { .. })
        ));
        assert!(matches!(
            order.plan_shipment(&[]),
            Err(OrderError::NothingToShip)
        ));
    }

    #[test]
    fn test_full_shipment_then_receipt() {
        let mut order = order();
        let plan = order.plan_full_shipment().unwrap();
        assert_eq!(plan.total_units(), 13);

        order.apply_shipment(&plan).unwrap();
        assert!(order.has_shipped_any());
        assert!(order.plan_full_shipment().is_err());

        let receipt = order
            .plan_receipt(&[(OrderLineId::new(11), 10), (OrderLineId::new(12), 2)])
            .unwrap();
        for (line_id, qty) in receipt {
            order.record_receipt(line_id, qty).unwrap();
        }
        assert!(!order.is_fully_received());

        order.record_receipt(OrderLineId::new(13), 1).unwrap();
        assert!(order.is_fully_received());
    }

    #[test]
    fn test_plan_receipt_bounded_by_shipped() {
        let mut order = order();
        let plan = order.plan_shipment(&[(OrderLineId::new(11), 3)]).unwrap();
        order.apply_shipment(&plan).unwrap();

        assert!(matches!(
            order.plan_receipt(&[(OrderLineId::new(11), 4)]),
            Err(OrderError::ExceedsAwaiting { awaiting: 3, .. })
        ));
    }

    #[test]
    fn test_ship_before_payment_needs_overdraft_tier() {
        let order = order();
        assert!(!can_ship_before_payment(&order, &tier(2)));
        assert!(can_ship_before_payment(&order, &tier(3)));

        let mut paid = order.clone();
        paid.transition(OrderTransition::Settle { fully_received: false })
            .unwrap();
        paid.payment_time = Some(Utc::now());
        assert!(!can_ship_before_payment(&paid, &tier(5)));
    }
}
