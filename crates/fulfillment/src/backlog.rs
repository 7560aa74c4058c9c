//! Shortage backlog: one open need per book and status.

use common::ShortageEntryId;
use domain::{FulfillmentEvent, NewShortage, ShortageEntry, ShortageStatus};
use store::UnitOfWork;

use crate::error::{FulfillmentError, Result};

/// What `complete_safely` did with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The entry itself is now COMPLETED.
    Completed(ShortageEntryId),
    /// The book already had a COMPLETED entry; references were moved there
    /// and the entry was deleted.
    MergedInto(ShortageEntryId),
    /// The entry was completed or merged away earlier. Nothing changed.
    AlreadyResolved,
}

/// Merge-safe operations over shortage entries.
pub struct ShortageBacklog;

impl ShortageBacklog {
    /// Adds `raise.quantity` to the book's PENDING entry, creating it if
    /// needed. The returned id is the same whether merged or new.
    #[tracing::instrument(skip(uow, raise), fields(book_id = %raise.book_id, quantity = raise.quantity))]
    pub async fn raise(uow: &mut dyn UnitOfWork, raise: NewShortage) -> Result<ShortageEntry> {
        let entry = uow.upsert_pending_shortage(&raise).await?;
        uow.record_event(&FulfillmentEvent::BacklogRaised {
            entry_id: entry.id,
            book_id: entry.book_id.clone(),
            quantity: raise.quantity,
            source: raise.source,
        })
        .await?;

        metrics::counter!("shortages_raised_total", "source" => raise.source.as_str())
            .increment(1);
        tracing::info!(entry_id = %entry.id, required = entry.required_quantity, "shortage raised");
        Ok(entry)
    }

    /// Moves PENDING entries to PURCHASING.
    ///
    /// When the book already has a PURCHASING entry the pending one is folded
    /// into it. Returns the id now carrying each input entry, in input order.
    #[tracing::instrument(skip(uow))]
    pub async fn mark_purchasing(
        uow: &mut dyn UnitOfWork,
        ids: &[ShortageEntryId],
    ) -> Result<Vec<ShortageEntryId>> {
        let mut carried = Vec::with_capacity(ids.len());
        for &id in ids {
            let mut entry = uow
                .get_shortage(id)
                .await?
                .ok_or_else(|| FulfillmentError::not_found("shortage entry", id))?;
            if entry.status != ShortageStatus::Pending {
                return Err(FulfillmentError::invalid_state(
                    "shortage entry",
                    id,
                    entry.status,
                    "start purchasing",
                ));
            }

            match uow
                .find_shortage(&entry.book_id, ShortageStatus::Purchasing)
                .await?
            {
                Some(mut open) => {
                    open.absorb(&entry).map_err(FulfillmentError::InvalidQuantity)?;
                    uow.update_shortage(&open).await?;
                    uow.redirect_shortage_references(id, open.id).await?;
                    uow.delete_shortage(id).await?;
                    tracing::debug!(from = %id, into = %open.id, "pending entry folded into purchasing entry");
                    carried.push(open.id);
                }
                None => {
                    entry.status = ShortageStatus::Purchasing;
                    uow.update_shortage(&entry).await?;
                    carried.push(id);
                }
            }
        }
        Ok(carried)
    }

    /// Marks an entry COMPLETED without breaking the one-entry-per-status
    /// rule. Safe to call again for the same id.
    #[tracing::instrument(skip(uow))]
    pub async fn complete_safely(
        uow: &mut dyn UnitOfWork,
        id: ShortageEntryId,
    ) -> Result<CompletionOutcome> {
        let Some(mut entry) = uow.get_shortage(id).await? else {
            return Ok(CompletionOutcome::AlreadyResolved);
        };
        if entry.status == ShortageStatus::Completed {
            return Ok(CompletionOutcome::AlreadyResolved);
        }

        if let Some(done) = uow
            .find_shortage(&entry.book_id, ShortageStatus::Completed)
            .await?
        {
            uow.redirect_shortage_references(id, done.id).await?;
            uow.delete_shortage(id).await?;
            return Ok(CompletionOutcome::MergedInto(done.id));
        }

        entry.status = ShortageStatus::Completed;
        uow.update_shortage(&entry).await?;
        Ok(CompletionOutcome::Completed(id))
    }
}
