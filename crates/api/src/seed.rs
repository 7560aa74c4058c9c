//! Start-up reference data and an optional demo catalog.

use common::{BookId, CreditTierId, SupplierId};
use domain::{
    Book, CustomerStatus, InventoryRecord, Money, NewCustomer, SupplyAgreement, TierTable,
};
use store::{Store, StoreError};

/// Writes the bookstore's default tier table into a store that has none.
///
/// Returns how many tiers were written.
pub async fn seed_credit_tiers<S: Store>(store: &S) -> Result<usize, StoreError> {
    let mut uow = store.begin().await?;
    if !uow.list_credit_tiers().await?.is_empty() {
        return Ok(0);
    }

    let table = TierTable::bookstore_default();
    for tier in table.tiers() {
        uow.upsert_credit_tier(tier).await?;
    }
    uow.commit().await?;
    tracing::info!(tiers = table.tiers().len(), "credit tiers seeded");
    Ok(table.tiers().len())
}

const DEMO_BOOKS: [(&str, &str, i64, u32, u32); 3] = [
    ("978-0-13-468599-1", "The Pragmatic Programmer", 4_999, 12, 3),
    ("978-1-59327-828-1", "The Rust Programming Language", 3_995, 4, 2),
    ("978-0-262-03384-8", "Introduction to Algorithms", 9_500, 0, 1),
];

/// Loads a small catalog, stock, one supplier and three customers.
///
/// Does nothing when the demo catalog is already present.
pub async fn seed_demo_data<S: Store>(store: &S) -> Result<(), StoreError> {
    let mut uow = store.begin().await?;
    if uow.get_book(&BookId::new(DEMO_BOOKS[0].0)).await?.is_some() {
        return Ok(());
    }

    let supplier = SupplierId::new(1);
    for (isbn, title, price_cents, stock, safety_stock) in DEMO_BOOKS {
        let book_id = BookId::new(isbn);
        let list_price = Money::from_cents(price_cents);
        uow.upsert_book(&Book {
            id: book_id.clone(),
            title: title.to_string(),
            list_price,
        })
        .await?;
        uow.upsert_inventory(&InventoryRecord {
            book_id: book_id.clone(),
            quantity: stock,
            safety_stock,
            location_code: Some("MAIN".to_string()),
        })
        .await?;
        uow.upsert_supply_agreement(&SupplyAgreement {
            supplier_id: supplier,
            book_id,
            supply_price: Money::from_cents(price_cents * 6 / 10),
            primary: true,
        })
        .await?;
    }

    for (name, balance, tier) in [
        ("Ada", Money::from_units(200), 1),
        ("Brook", Money::from_units(1_000), 3),
        ("Cato", Money::from_units(-2_000), 5),
    ] {
        let customer = uow
            .insert_customer(NewCustomer {
                name: name.to_string(),
                balance,
                cumulative_spend: Money::zero(),
                credit_tier_id: CreditTierId::new(tier),
                status: CustomerStatus::Active,
            })
            .await?;
        tracing::info!(customer_id = %customer.id, name, tier, "demo customer created");
    }

    uow.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::InMemoryStore;

    #[tokio::test]
    async fn test_tiers_seeded_once() {
        let store = InMemoryStore::new();

        assert_eq!(seed_credit_tiers(&store).await.unwrap(), 5);
        assert_eq!(seed_credit_tiers(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_demo_data_is_idempotent() {
        let store = InMemoryStore::new();
        seed_credit_tiers(&store).await.unwrap();

        seed_demo_data(&store).await.unwrap();
        seed_demo_data(&store).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let record = uow
            .get_inventory(&BookId::new(DEMO_BOOKS[1].0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.quantity, 4);
        let agreements = uow
            .list_supply_agreements(SupplierId::new(1), &BookId::new(DEMO_BOOKS[2].0))
            .await
            .unwrap();
        assert_eq!(agreements.len(), 1);
        assert_eq!(agreements[0].supply_price, Money::from_units(57));
    }
}
