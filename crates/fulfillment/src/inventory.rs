//! Inventory ledger: guarded stock movements and the low-stock trigger.

use chrono::NaiveDate;
use common::BookId;
use domain::{InventoryRecord, NewShortage};
use store::UnitOfWork;

use crate::backlog::ShortageBacklog;
use crate::error::{FulfillmentError, Result, StockShortfall};

/// Per-book stock operations.
pub struct InventoryLedger;

impl InventoryLedger {
    /// Units on hand. Books without a record have none.
    pub async fn quantity(uow: &mut dyn UnitOfWork, book_id: &BookId) -> Result<u32> {
        Ok(uow
            .get_inventory(book_id)
            .await?
            .map_or(0, |record| record.quantity))
    }

    pub async fn safety_stock(uow: &mut dyn UnitOfWork, book_id: &BookId) -> Result<u32> {
        Ok(uow
            .get_inventory(book_id)
            .await?
            .map_or(0, |record| record.safety_stock))
    }

    pub async fn increase(
        uow: &mut dyn UnitOfWork,
        book_id: &BookId,
        delta: u32,
    ) -> Result<InventoryRecord> {
        let record = uow.increase_inventory(book_id, delta).await?;
        tracing::debug!(%book_id, delta, quantity = record.quantity, "stock increased");
        Ok(record)
    }

    /// Takes `delta` units off the book's stock or fails with
    /// `InsufficientStock` without changing anything.
    ///
    /// A decrement that leaves the book under its safety stock raises a
    /// LOW_STOCK shortage for the gap.
    pub async fn decrease(
        uow: &mut dyn UnitOfWork,
        book_id: &BookId,
        delta: u32,
        today: NaiveDate,
    ) -> Result<InventoryRecord> {
        let Some(record) = uow.decrease_inventory(book_id, delta).await? else {
            let on_hand = Self::quantity(uow, book_id).await?;
            return Err(FulfillmentError::InsufficientStock {
                shortfalls: vec![StockShortfall {
                    book_id: book_id.clone(),
                    on_hand,
                    required: delta,
                }],
            });
        };

        if let Some(gap) = record.low_stock_gap() {
            tracing::info!(%book_id, quantity = record.quantity, safety_stock = record.safety_stock, "stock below safety level");
            ShortageBacklog::raise(uow, NewShortage::low_stock(book_id.clone(), gap, today))
                .await?;
        }
        Ok(record)
    }

    /// Compares each requested book against stock on hand.
    ///
    /// Returns every book that cannot be covered.
    pub async fn shortfalls(
        uow: &mut dyn UnitOfWork,
        required: impl IntoIterator<Item = (BookId, u32)>,
    ) -> Result<Vec<StockShortfall>> {
        let mut shortfalls = Vec::new();
        for (book_id, required) in required {
            let on_hand = Self::quantity(uow, &book_id).await?;
            if on_hand < required {
                shortfalls.push(StockShortfall {
                    book_id,
                    on_hand,
                    required,
                });
            }
        }
        Ok(shortfalls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{ShortageSource, ShortageStatus};
    use store::{InMemoryStore, Store};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    async fn stocked(quantity: u32, safety_stock: u32) -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.upsert_inventory(&InventoryRecord {
            book_id: BookId::new("X"),
            quantity,
            safety_stock,
            location_code: None,
        })
        .await
        .unwrap();
        uow.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_decrease_refuses_to_go_negative() {
        let store = stocked(3, 0).await;
        let mut uow = store.begin().await.unwrap();

        let err = InventoryLedger::decrease(uow.as_mut(), &BookId::new("X"), 4, today())
            .await
            .unwrap_err();

        match err {
            FulfillmentError::InsufficientStock { shortfalls } => {
                assert_eq!(shortfalls[0].on_hand, 3);
                assert_eq!(shortfalls[0].required, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            InventoryLedger::quantity(uow.as_mut(), &BookId::new("X"))
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_low_stock_raises_gap() {
        let store = stocked(10, 5).await;
        let mut uow = store.begin().await.unwrap();
        let book = BookId::new("X");

        InventoryLedger::decrease(uow.as_mut(), &book, 7, today())
            .await
            .unwrap();

        let entry = uow
            .find_shortage(&book, ShortageStatus::Pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.required_quantity, 2);
        assert_eq!(entry.source, ShortageSource::LowStock);
    }

    #[tokio::test]
    async fn test_no_raise_without_safety_stock() {
        let store = stocked(5, 0).await;
        let mut uow = store.begin().await.unwrap();

        InventoryLedger::decrease(uow.as_mut(), &BookId::new("X"), 5, today())
            .await
            .unwrap();

        assert!(uow.list_shortages(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shortfalls_lists_every_short_book() {
        let store = stocked(2, 0).await;
        let mut uow = store.begin().await.unwrap();

        let shortfalls = InventoryLedger::shortfalls(
            uow.as_mut(),
            [
                (BookId::new("X"), 3),
                (BookId::new("Y"), 1),
                (BookId::new("X"), 2),
            ],
        )
        .await
        .unwrap();

        assert_eq!(shortfalls.len(), 2);
        assert_eq!(shortfalls[1].book_id, BookId::new("Y"));
        assert_eq!(shortfalls[1].on_hand, 0);
    }
}
