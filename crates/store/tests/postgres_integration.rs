//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container and clear the tables
//! before each test. Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use common::{BookId, CreditTierId, CustomerId, SupplierId};
use domain::{
    Book, CustomerStatus, DEFAULT_PRIORITY, DiscountRate, FulfillmentEvent, InventoryRecord, Money,
    NewCustomer, NewOrder, NewOrderLine, NewPurchaseLine, NewPurchaseOrder, NewShipment,
    NewShortage, NewShortageRequest, OrderError, OrderStatus, RequestStatus, ShortageSource,
    ShortageStatus, SupplyAgreement, TierTable,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{PostgresStore, Store, StoreError, UnitOfWork};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_fulfillment_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Fresh store with its own pool, cleared tables and the default tiers.
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE fulfillment_event, purchase_line, purchase_order, supply_agreement, \
         shipment_line, shipment, customer_shortage_request, order_line, sales_order, \
         shortage_entry, inventory, book, customer, credit_tier RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .unwrap();

    let store = PostgresStore::new(pool);
    let mut uow = store.begin().await.unwrap();
    for tier in TierTable::bookstore_default().tiers() {
        uow.upsert_credit_tier(tier).await.unwrap();
    }
    uow.commit().await.unwrap();
    store
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

fn new_customer(balance: i64, tier: i64) -> NewCustomer {
    NewCustomer {
        name: "Ada".to_string(),
        balance: Money::from_units(balance),
        cumulative_spend: Money::zero(),
        credit_tier_id: CreditTierId::new(tier),
        status: CustomerStatus::Active,
    }
}

async fn seed_order(uow: &mut Box<dyn UnitOfWork>, quantity: u32) -> domain::Order {
    let customer = uow.insert_customer(new_customer(100, 1)).await.unwrap();
    uow.upsert_book(&Book {
        id: BookId::new("B1"),
        title: "Dune".to_string(),
        list_price: Money::from_units(10),
    })
    .await
    .unwrap();
    uow.insert_order(NewOrder {
        customer_id: customer.id,
        discount_rate: DiscountRate::FULL_PRICE,
        shipping_address: "Ada".to_string(),
        customer_note: None,
        order_time: Utc::now(),
        lines: vec![NewOrderLine {
            book_id: BookId::new("B1"),
            quantity,
            unit_price: Money::from_units(10),
            sub_amount: Money::from_units(10).multiply(quantity),
        }],
    })
    .await
    .unwrap()
}

#[tokio::test]
#[serial]
#[ignore = "needs a Docker daemon"]
async fn tiers_round_trip_with_overdraft_policies() {
    let store = get_test_store().await;
    let mut uow = store.begin().await.unwrap();

    let tiers = uow.list_credit_tiers().await.unwrap();
    assert_eq!(tiers, TierTable::bookstore_default().tiers().to_vec());
}

#[tokio::test]
#[serial]
#[ignore = "needs a Docker daemon"]
async fn rollback_discards_writes() {
    let store = get_test_store().await;

    let id = {
        let mut uow = store.begin().await.unwrap();
        let customer = uow.insert_customer(new_customer(50, 1)).await.unwrap();
        customer.id
    };

    let mut uow = store.begin().await.unwrap();
    assert!(uow.get_customer(id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "needs a Docker daemon"]
async fn debit_is_relative_and_tracks_spend() {
    let store = get_test_store().await;
    let mut uow = store.begin().await.unwrap();
    let customer = uow.insert_customer(new_customer(50, 2)).await.unwrap();

    let after = uow
        .debit_customer(customer.id, Money::from_units(80))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    assert_eq!(after.balance, Money::from_units(-30));
    assert_eq!(after.cumulative_spend, Money::from_units(80));
}

/// Locks the customer, checks the balance, debits and commits. Returns
/// whether the charge went through.
async fn charge_if_covered(store: PostgresStore, id: CustomerId, amount: Money) -> bool {
    let mut uow = store.begin().await.unwrap();
    let customer = uow.lock_customer(id).await.unwrap().unwrap();
    // hold the row lock long enough for the other charge to queue behind it
    tokio::time::sleep(Duration::from_millis(50)).await;
    if customer.balance < amount {
        return false;
    }
    uow.debit_customer(id, amount).await.unwrap();
    uow.commit().await.unwrap();
    true
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
#[ignore = "needs a Docker daemon"]
async fn concurrent_charges_debit_once() {
    let store = get_test_store().await;
    let mut uow = store.begin().await.unwrap();
    let customer = uow.insert_customer(new_customer(100, 1)).await.unwrap();
    uow.commit().await.unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(charge_if_covered(store, customer.id, Money::from_units(90)))
        })
        .collect();
    let mut charged = 0;
    for handle in handles {
        if handle.await.unwrap() {
            charged += 1;
        }
    }

    assert_eq!(charged, 1);
    let mut uow = store.begin().await.unwrap();
    let after = uow.get_customer(customer.id).await.unwrap().unwrap();
    assert_eq!(after.balance, Money::from_units(10));
    assert_eq!(after.cumulative_spend, Money::from_units(90));
}

#[tokio::test]
#[serial]
#[ignore = "needs a Docker daemon"]
async fn quantity_overflow_rolls_back() {
    let store = get_test_store().await;
    let book = BookId::new("B1");
    let mut uow = store.begin().await.unwrap();
    uow.increase_inventory(&book, u32::MAX).await.unwrap();
    uow.upsert_pending_shortage(&NewShortage::new(
        book.clone(),
        u32::MAX,
        ShortageSource::Manual,
        today(),
    ))
    .await
    .unwrap();
    uow.commit().await.unwrap();

    let mut uow = store.begin().await.unwrap();
    let err = uow.increase_inventory(&book, 1).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Quantity(OrderError::QuantityOverflow { current: u32::MAX, added: 1, .. })
    ));
    drop(uow);

    let mut uow = store.begin().await.unwrap();
    let raise = NewShortage::new(book.clone(), 2, ShortageSource::Manual, today());
    let err = uow.upsert_pending_shortage(&raise).await.unwrap_err();
    assert!(matches!(err, StoreError::Quantity(_)));
    drop(uow);

    let mut uow = store.begin().await.unwrap();
    let record = uow.get_inventory(&book).await.unwrap().unwrap();
    assert_eq!(record.quantity, u32::MAX);
    let pending = uow.list_shortages(Some(ShortageStatus::Pending)).await.unwrap();
    assert_eq!(pending[0].required_quantity, u32::MAX);
    assert_eq!(pending[0].priority, DEFAULT_PRIORITY);
}

#[tokio::test]
#[serial]
#[ignore = "needs a Docker daemon"]
async fn conditional_decrease_refuses_overdraw() {
    let store = get_test_store().await;
    let mut uow = store.begin().await.unwrap();
    let book = BookId::new("B1");
    uow.upsert_inventory(&InventoryRecord {
        book_id: book.clone(),
        quantity: 3,
        safety_stock: 1,
        location_code: Some("A-01".to_string()),
    })
    .await
    .unwrap();

    assert!(uow.decrease_inventory(&book, 4).await.unwrap().is_none());
    let record = uow.decrease_inventory(&book, 3).await.unwrap().unwrap();
    assert_eq!(record.quantity, 0);

    let record = uow.increase_inventory(&book, 7).await.unwrap();
    assert_eq!(record.quantity, 7);
    let created = uow.increase_inventory(&BookId::new("B2"), 2).await.unwrap();
    assert_eq!(created.quantity, 2);
}

#[tokio::test]
#[serial]
#[ignore = "needs a Docker daemon"]
async fn pending_shortage_merges_and_keeps_customer() {
    let store = get_test_store().await;
    let mut uow = store.begin().await.unwrap();
    let customer = uow.insert_customer(new_customer(0, 1)).await.unwrap();

    let first = uow
        .upsert_pending_shortage(
            &NewShortage::new(BookId::new("B1"), 3, ShortageSource::CustomerRequest, today())
                .for_customer(customer.id),
        )
        .await
        .unwrap();
    let merged = uow
        .upsert_pending_shortage(&NewShortage::new(
            BookId::new("B1"),
            4,
            ShortageSource::LowStock,
            today(),
        ))
        .await
        .unwrap();

    assert_eq!(merged.id, first.id);
    assert_eq!(merged.required_quantity, 7);
    assert_eq!(merged.source, ShortageSource::LowStock);
    assert_eq!(merged.related_customer_id, Some(customer.id));
    assert_eq!(merged.status, ShortageStatus::Pending);
}

#[tokio::test]
#[serial]
#[ignore = "needs a Docker daemon"]
async fn shortage_status_change_respects_uniqueness() {
    let store = get_test_store().await;
    let mut uow = store.begin().await.unwrap();
    let raise = NewShortage::new(BookId::new("B1"), 2, ShortageSource::Manual, today());

    let mut first = uow.upsert_pending_shortage(&raise).await.unwrap();
    first.status = ShortageStatus::Purchasing;
    uow.update_shortage(&first).await.unwrap();

    let mut second = uow.upsert_pending_shortage(&raise).await.unwrap();
    assert_ne!(second.id, first.id);
    second.status = ShortageStatus::Purchasing;

    let err = uow.update_shortage(&second).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::UniqueViolation { ref constraint } if constraint == "uq_shortage_book_status"
    ));
}

#[tokio::test]
#[serial]
#[ignore = "needs a Docker daemon"]
async fn order_status_change_is_checked() {
    let store = get_test_store().await;
    let mut uow = store.begin().await.unwrap();
    let mut order = seed_order(&mut uow, 2).await;

    order.status = OrderStatus::Completed;
    uow.save_order(&order).await.unwrap();

    order.status = OrderStatus::PendingPayment;
    let err = uow.save_order(&order).await.unwrap_err();
    assert!(matches!(err, StoreError::IllegalStatusChange { .. }));
}

#[tokio::test]
#[serial]
#[ignore = "needs a Docker daemon"]
async fn shipments_load_in_creation_order_with_lines() {
    let store = get_test_store().await;
    let mut uow = store.begin().await.unwrap();
    let mut order = seed_order(&mut uow, 8).await;
    let line_id = order.lines[0].id;

    for quantity in [3, 5] {
        let plan = order.plan_shipment(&[(line_id, quantity)]).unwrap();
        order.apply_shipment(&plan).unwrap();
        uow.insert_shipment(NewShipment::from_plan(
            order.id,
            &plan,
            "SF".to_string(),
            format!("T-{quantity}"),
            "ops".to_string(),
            Utc::now(),
        ))
        .await
        .unwrap();
    }
    order.status = OrderStatus::Delivering;
    uow.save_order(&order).await.unwrap();
    uow.commit().await.unwrap();

    let mut uow = store.begin().await.unwrap();
    let shipments = uow.list_shipments(order.id).await.unwrap();
    assert_eq!(shipments.len(), 2);
    assert!(shipments[0].id < shipments[1].id);
    assert_eq!(shipments[0].lines[0].ship_quantity, 3);
    assert_eq!(shipments[1].lines[0].ship_quantity, 5);

    let stored = uow.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.lines[0].shipped_quantity, 8);
}

#[tokio::test]
#[serial]
#[ignore = "needs a Docker daemon"]
async fn redirect_moves_purchase_lines_and_requests() {
    let store = get_test_store().await;
    let mut uow = store.begin().await.unwrap();
    let order = seed_order(&mut uow, 1).await;
    let book = BookId::new("B1");

    let pending = uow
        .upsert_pending_shortage(&NewShortage::new(
            book.clone(),
            2,
            ShortageSource::Manual,
            today(),
        ))
        .await
        .unwrap();
    let mut purchasing = pending.clone();
    purchasing.status = ShortageStatus::Purchasing;
    uow.update_shortage(&purchasing).await.unwrap();
    let pending = uow
        .upsert_pending_shortage(&NewShortage::new(
            book.clone(),
            1,
            ShortageSource::Manual,
            today(),
        ))
        .await
        .unwrap();

    uow.insert_shortage_request(NewShortageRequest {
        order_id: order.id,
        customer_id: order.customer_id,
        book_id: book.clone(),
        requested_qty: 1,
        customer_note: None,
        paid: false,
        status: RequestStatus::Accepted,
        related_entry_id: Some(pending.id),
        notified: false,
        created_at: Utc::now(),
    })
    .await
    .unwrap();
    uow.upsert_supply_agreement(&SupplyAgreement {
        supplier_id: SupplierId::new(1),
        book_id: book.clone(),
        supply_price: Money::from_units(6),
        primary: true,
    })
    .await
    .unwrap();
    uow.insert_purchase_order(NewPurchaseOrder {
        supplier_id: SupplierId::new(1),
        create_date: today(),
        expected_date: None,
        buyer: "buyer".to_string(),
        lines: vec![NewPurchaseLine {
            book_id: book.clone(),
            quantity: 1,
            unit_price: Money::from_units(6),
            related_entry_id: Some(pending.id),
        }],
    })
    .await
    .unwrap();

    let moved = uow
        .redirect_shortage_references(pending.id, purchasing.id)
        .await
        .unwrap();
    assert_eq!(moved, 2);
    uow.delete_shortage(pending.id).await.unwrap();

    let requests = uow.list_requests_for_order(order.id).await.unwrap();
    assert_eq!(requests[0].related_entry_id, Some(purchasing.id));
    assert_eq!(requests[0].processed_at, Some(requests[0].created_at));
}

#[tokio::test]
#[serial]
#[ignore = "needs a Docker daemon"]
async fn events_are_recorded_per_order() {
    let store = get_test_store().await;
    let mut uow = store.begin().await.unwrap();
    let order = seed_order(&mut uow, 1).await;

    uow.record_event(&FulfillmentEvent::OrderCompleted { order_id: order.id })
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let mut uow = store.begin().await.unwrap();
    let events = uow.list_events(order.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "OrderCompleted");
    assert_eq!(
        events[0].event().unwrap(),
        FulfillmentEvent::OrderCompleted { order_id: order.id }
    );
}
