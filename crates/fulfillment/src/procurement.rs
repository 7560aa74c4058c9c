//! Procurement linkage: purchase orders raised from the shortage backlog.

use std::time::Instant;

use chrono::{NaiveDate, Utc};
use common::{PurchaseOrderId, ShortageEntryId, SupplierId};
use domain::{
    FulfillmentEvent, NewPurchaseLine, NewPurchaseOrder, PurchaseOrder, PurchaseStatus,
    ShortageStatus, preferred_agreement,
};
use store::Store;

use crate::backlog::{CompletionOutcome, ShortageBacklog};
use crate::error::{FulfillmentError, Result};
use crate::inventory::InventoryLedger;

/// Turns backlog entries into purchase orders and books goods receipt.
pub struct ProcurementService<S: Store> {
    store: S,
}

impl<S: Store> ProcurementService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Issues one purchase order covering the given PENDING entries.
    ///
    /// Each line is priced from the supplier's preferred agreement for the
    /// book, and the entries move to PURCHASING.
    #[tracing::instrument(skip(self, buyer))]
    pub async fn create_purchase_from_shortages(
        &self,
        entry_ids: &[ShortageEntryId],
        supplier_id: SupplierId,
        expected_date: Option<NaiveDate>,
        buyer: String,
    ) -> Result<PurchaseOrder> {
        let mut ids: Vec<ShortageEntryId> = Vec::with_capacity(entry_ids.len());
        for &id in entry_ids {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            return Err(FulfillmentError::NothingToPurchase);
        }

        let started = Instant::now();
        let mut uow = self.store.begin().await?;

        let mut entries = Vec::with_capacity(ids.len());
        let mut prices = Vec::with_capacity(ids.len());
        for &id in &ids {
            let entry = uow
                .get_shortage(id)
                .await?
                .ok_or_else(|| FulfillmentError::not_found("shortage entry", id))?;
            if entry.status != ShortageStatus::Pending {
                return Err(FulfillmentError::invalid_state(
                    "shortage entry",
                    id,
                    entry.status,
                    "purchase",
                ));
            }
            let agreements = uow
                .list_supply_agreements(supplier_id, &entry.book_id)
                .await?;
            let price = preferred_agreement(&agreements)
                .map(|a| a.supply_price)
                .ok_or_else(|| FulfillmentError::NoSupplyAgreement {
                    supplier_id,
                    book_id: entry.book_id.clone(),
                })?;
            prices.push(price);
            entries.push(entry);
        }

        let carried = ShortageBacklog::mark_purchasing(uow.as_mut(), &ids).await?;

        let lines = entries
            .into_iter()
            .zip(prices)
            .zip(&carried)
            .map(|((entry, unit_price), &carried_id)| NewPurchaseLine {
                book_id: entry.book_id,
                quantity: entry.required_quantity,
                unit_price,
                related_entry_id: Some(carried_id),
            })
            .collect();
        let purchase = uow
            .insert_purchase_order(NewPurchaseOrder {
                supplier_id,
                create_date: Utc::now().date_naive(),
                expected_date,
                buyer,
                lines,
            })
            .await?;

        uow.record_event(&FulfillmentEvent::PurchaseIssued {
            purchase_order_id: purchase.id,
            entry_ids: carried,
            estimated_amount: purchase.estimated_amount,
        })
        .await?;
        uow.commit().await?;

        metrics::counter!("purchase_orders_created_total").increment(1);
        metrics::histogram!("fulfillment_operation_duration_seconds", "operation" => "create_purchase")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(purchase_order_id = %purchase.id, lines = purchase.lines.len(), amount = %purchase.estimated_amount, "purchase order issued");
        Ok(purchase)
    }

    /// Books the goods of a purchase order into stock and completes the
    /// entries they were bought for.
    ///
    /// Receiving a COMPLETED purchase order again changes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn receive_goods(&self, purchase_order_id: PurchaseOrderId) -> Result<PurchaseOrder> {
        let started = Instant::now();
        let mut uow = self.store.begin().await?;
        let mut purchase = uow
            .lock_purchase_order(purchase_order_id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("purchase order", purchase_order_id))?;

        if purchase.status == PurchaseStatus::Completed {
            tracing::debug!("purchase order already received");
            return Ok(purchase);
        }

        let mut units: u64 = 0;
        for line in &purchase.lines {
            InventoryLedger::increase(uow.as_mut(), &line.book_id, line.quantity).await?;
            units += u64::from(line.quantity);
            if let Some(entry_id) = line.related_entry_id {
                let outcome = ShortageBacklog::complete_safely(uow.as_mut(), entry_id).await?;
                if let CompletionOutcome::MergedInto(into) = outcome {
                    tracing::debug!(from = %entry_id, %into, "entry merged into completed entry");
                }
            }
        }

        uow.set_purchase_status(purchase_order_id, PurchaseStatus::Completed)
            .await?;
        purchase.status = PurchaseStatus::Completed;
        uow.record_event(&FulfillmentEvent::GoodsReceived {
            purchase_order_id,
            units,
        })
        .await?;
        uow.commit().await?;

        metrics::counter!("purchase_orders_received_total").increment(1);
        metrics::histogram!("fulfillment_operation_duration_seconds", "operation" => "receive_goods")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(units, "goods received");
        Ok(purchase)
    }

    pub async fn get_purchase_order(&self, id: PurchaseOrderId) -> Result<PurchaseOrder> {
        let mut uow = self.store.begin().await?;
        uow.get_purchase_order(id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("purchase order", id))
    }
}
