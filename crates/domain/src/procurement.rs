//! Purchase orders raised against the shortage backlog.

use chrono::NaiveDate;
use common::{BookId, PurchaseLineId, PurchaseOrderId, ShortageEntryId, SupplierId};
use serde::{Deserialize, Serialize};

use crate::value_objects::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseStatus {
    #[default]
    Issued,
    Completed,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Issued => "ISSUED",
            PurchaseStatus::Completed => "COMPLETED",
        }
    }
}

impl std::str::FromStr for PurchaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ISSUED" => Ok(PurchaseStatus::Issued),
            "COMPLETED" => Ok(PurchaseStatus::Completed),
            other => Err(format!("unknown purchase status: {other}")),
        }
    }
}

/// A supplier's quoted price for a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyAgreement {
    pub supplier_id: SupplierId,
    pub book_id: BookId,
    pub supply_price: Money,
    /// Preferred quote when a supplier has several for the same book.
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub create_date: NaiveDate,
    pub expected_date: Option<NaiveDate>,
    pub buyer: String,
    pub estimated_amount: Money,
    pub status: PurchaseStatus,
    pub lines: Vec<PurchaseLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub id: PurchaseLineId,
    pub purchase_order_id: PurchaseOrderId,
    pub book_id: BookId,
    pub quantity: u32,
    pub unit_price: Money,
    pub related_entry_id: Option<ShortageEntryId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPurchaseOrder {
    pub supplier_id: SupplierId,
    pub create_date: NaiveDate,
    pub expected_date: Option<NaiveDate>,
    pub buyer: String,
    pub lines: Vec<NewPurchaseLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPurchaseLine {
    pub book_id: BookId,
    pub quantity: u32,
    pub unit_price: Money,
    pub related_entry_id: Option<ShortageEntryId>,
}

impl NewPurchaseOrder {
    /// Σ unit price × quantity over all lines.
    pub fn estimated_amount(&self) -> Money {
        self.lines
            .iter()
            .map(|l| l.unit_price.multiply(l.quantity))
            .sum()
    }

    /// `line_ids` must hold one id per line, in line order.
    pub fn into_purchase_order(
        self,
        id: PurchaseOrderId,
        line_ids: &[PurchaseLineId],
    ) -> PurchaseOrder {
        let estimated_amount = self.estimated_amount();
        PurchaseOrder {
            id,
            supplier_id: self.supplier_id,
            create_date: self.create_date,
            expected_date: self.expected_date,
            buyer: self.buyer,
            estimated_amount,
            status: PurchaseStatus::Issued,
            lines: self
                .lines
                .into_iter()
                .zip(line_ids)
                .map(|(l, &line_id)| PurchaseLine {
                    id: line_id,
                    purchase_order_id: id,
                    book_id: l.book_id,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    related_entry_id: l.related_entry_id,
                })
                .collect(),
        }
    }
}

/// Picks the quote to use from a supplier's agreements for one book.
pub fn preferred_agreement(agreements: &[SupplyAgreement]) -> Option<&SupplyAgreement> {
    agreements
        .iter()
        .find(|a| a.primary)
        .or_else(|| agreements.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimated_amount_sums_lines() {
        let po = NewPurchaseOrder {
            supplier_id: SupplierId::new(1),
            create_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            expected_date: None,
            buyer: "buyer".to_string(),
            lines: vec![
                NewPurchaseLine {
                    book_id: BookId::new("A"),
                    quantity: 3,
                    unit_price: Money::from_cents(1_250),
                    related_entry_id: Some(ShortageEntryId::new(1)),
                },
                NewPurchaseLine {
                    book_id: BookId::new("B"),
                    quantity: 1,
                    unit_price: Money::from_cents(999),
                    related_entry_id: None,
                },
            ],
        };
        assert_eq!(po.estimated_amount(), Money::from_cents(4_749));

        let stored = po.into_purchase_order(
            PurchaseOrderId::new(5),
            &[PurchaseLineId::new(50), PurchaseLineId::new(51)],
        );
        assert_eq!(stored.status, PurchaseStatus::Issued);
        assert_eq!(stored.lines[1].id, PurchaseLineId::new(51));
        assert_eq!(stored.lines[0].purchase_order_id, PurchaseOrderId::new(5));
    }

    #[test]
    fn test_primary_agreement_wins() {
        let quote = |price: i64, primary: bool| SupplyAgreement {
            supplier_id: SupplierId::new(1),
            book_id: BookId::new("A"),
            supply_price: Money::from_cents(price),
            primary,
        };
        let agreements = vec![quote(900, false), quote(800, true)];
        assert_eq!(
            preferred_agreement(&agreements).unwrap().supply_price,
            Money::from_cents(800)
        );
        assert!(preferred_agreement(&[]).is_none());
    }
}
