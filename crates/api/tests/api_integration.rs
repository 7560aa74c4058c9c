//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{BookId, CreditTierId, CustomerId, SupplierId};
use domain::{Book, CustomerStatus, InventoryRecord, Money, NewCustomer, SupplyAgreement};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::{InMemoryStore, Store};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// App over a store holding the default tiers, book `B1` (10.00, 5 in
/// stock, supplier 1 quotes 6.00) and one customer.
async fn setup(balance: Money, tier: i64) -> (axum::Router, CustomerId) {
    let store = InMemoryStore::new();
    api::seed::seed_credit_tiers(&store).await.unwrap();

    let mut uow = store.begin().await.unwrap();
    let book_id = BookId::new("B1");
    uow.upsert_book(&Book {
        id: book_id.clone(),
        title: "Systems Performance".to_string(),
        list_price: Money::from_units(10),
    })
    .await
    .unwrap();
    uow.upsert_inventory(&InventoryRecord {
        book_id: book_id.clone(),
        quantity: 5,
        safety_stock: 0,
        location_code: None,
    })
    .await
    .unwrap();
    uow.upsert_supply_agreement(&SupplyAgreement {
        supplier_id: SupplierId::new(1),
        book_id,
        supply_price: Money::from_units(6),
        primary: true,
    })
    .await
    .unwrap();
    let customer = uow
        .insert_customer(NewCustomer {
            name: "Ada".to_string(),
            balance,
            cumulative_spend: Money::zero(),
            credit_tier_id: CreditTierId::new(tier),
            status: CustomerStatus::Active,
        })
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let state = api::create_default_state(store);
    (api::create_app(state, get_metrics_handle()), customer.id)
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn checkout(app: &axum::Router, customer: CustomerId, quantity: u32) -> Value {
    let (status, order) = send(
        app,
        "POST",
        &format!("/customers/{customer}/orders"),
        Some(json!({ "items": [{ "book_id": "B1", "quantity": quantity }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    order
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup(Money::zero(), 1).await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "reachable");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup(Money::zero(), 1).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_order_lifecycle() {
    let (app, customer) = setup(Money::from_units(100), 1).await;
    let order = checkout(&app, customer, 2).await;
    assert_eq!(order["status"], "PENDING_PAYMENT");
    assert_eq!(order["payable_amount"], 1800);
    assert_eq!(order["shipping_address"], "Ada");
    let id = order["id"].as_i64().unwrap();

    let (status, paid) = send(&app, "POST", &format!("/orders/{id}/pay"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "PENDING_SHIPMENT");

    let (status, shipped) = send(
        &app,
        "POST",
        &format!("/orders/{id}/ship"),
        Some(json!({ "carrier": "Post", "tracking_number": "T-1", "operator": "ops" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(shipped["order"]["status"], "DELIVERING");
    let shipment_id = shipped["shipment"]["id"].as_i64().unwrap();

    let (status, received) = send(
        &app,
        "POST",
        &format!("/orders/{id}/receive"),
        Some(json!({ "by": "shipment", "shipment_id": shipment_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(received["status"], "COMPLETED");

    let (status, detail) = send(&app, "GET", &format!("/orders/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["shipments"][0]["status"], "DELIVERED");

    let (_, events) = send(&app, "GET", &format!("/orders/{id}/events"), None).await;
    let types: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["event_type"].as_str())
        .collect();
    assert_eq!(
        types,
        [
            "OrderPlaced",
            "PaymentCaptured",
            "ShipmentDispatched",
            "ReceiptConfirmed",
            "OrderCompleted"
        ]
    );
}

#[tokio::test]
async fn test_declined_payment_reports_terms() {
    let (app, customer) = setup(Money::from_units(5), 1).await;
    let order = checkout(&app, customer, 1).await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("/orders/{}/pay", order["id"]),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "insufficient_funds");
    assert_eq!(json["details"]["payable"], "9.00");
    assert_eq!(json["details"]["balance"], "5.00");
    assert_eq!(json["details"]["overdraft"], "overdraft not allowed");
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let (app, _) = setup(Money::zero(), 1).await;

    let (status, json) = send(&app, "GET", "/orders/999", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn test_zero_quantity_is_bad_request() {
    let (app, customer) = setup(Money::zero(), 1).await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("/customers/{customer}/orders"),
        Some(json!({ "items": [{ "book_id": "B1", "quantity": 0 }] })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_quantity");
}

#[tokio::test]
async fn test_shipment_shortfall_is_conflict() {
    let (app, customer) = setup(Money::from_units(100), 1).await;
    let order = checkout(&app, customer, 7).await;
    let id = order["id"].as_i64().unwrap();
    send(&app, "POST", &format!("/orders/{id}/pay"), None).await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("/orders/{id}/ship"),
        Some(json!({ "lines": [], "carrier": "Post", "tracking_number": "T", "operator": "ops" })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "insufficient_stock");
    assert_eq!(json["details"]["shortfalls"][0]["on_hand"], 5);
    assert_eq!(json["details"]["shortfalls"][0]["required"], 7);
}

#[tokio::test]
async fn test_shortage_review_flow() {
    let (app, customer) = setup(Money::from_units(100), 1).await;
    let order = checkout(&app, customer, 6).await;
    let id = order["id"].as_i64().unwrap();

    let (_, shortages) = send(&app, "GET", &format!("/orders/{id}/shortages"), None).await;
    assert_eq!(shortages[0]["required"], 6);
    assert_eq!(shortages[0]["on_hand"], 5);

    let (status, held) = send(
        &app,
        "POST",
        &format!("/orders/{id}/shortages/decision"),
        Some(json!({ "decision": "register_only", "note": "no rush" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(held["status"], "OUT_OF_STOCK_PENDING");

    let (_, pending) = send(&app, "GET", "/shortage-requests", None).await;
    let request_id = pending[0]["id"].as_i64().unwrap();

    let (status, released) = send(
        &app,
        "POST",
        &format!("/shortage-requests/{request_id}/accept"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(released["status"], "PENDING_PAYMENT");

    let (status, json) = send(
        &app,
        "POST",
        &format!("/shortage-requests/{request_id}/reject"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "invalid_state");
}

#[tokio::test]
async fn test_backlog_to_purchase_order() {
    let (app, _) = setup(Money::zero(), 1).await;

    let (status, entry) = send(
        &app,
        "POST",
        "/shortages",
        Some(json!({ "book_id": "B1", "quantity": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(entry["priority"], 1);
    assert_eq!(entry["source"], "MANUAL");

    let (_, pending) = send(&app, "GET", "/shortages?status=PENDING", None).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let (status, purchase) = send(
        &app,
        "POST",
        "/purchase-orders",
        Some(json!({
            "entry_ids": [entry["id"]],
            "supplier_id": 1,
            "expected_date": "2026-11-01",
            "buyer": "procurement"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(purchase["status"], "ISSUED");
    assert_eq!(purchase["estimated_amount"], 1800);
    let purchase_id = purchase["id"].as_i64().unwrap();

    let (status, received) = send(
        &app,
        "POST",
        &format!("/purchase-orders/{purchase_id}/receive"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(received["status"], "COMPLETED");

    let (_, completed) = send(&app, "GET", "/shortages?status=COMPLETED", None).await;
    assert_eq!(completed[0]["id"], entry["id"]);
}

#[tokio::test]
async fn test_purchase_without_agreement_is_bad_request() {
    let (app, _) = setup(Money::zero(), 1).await;
    let (_, entry) = send(
        &app,
        "POST",
        "/shortages",
        Some(json!({ "book_id": "B1", "quantity": 3 })),
    )
    .await;

    let (status, json) = send(
        &app,
        "POST",
        "/purchase-orders",
        Some(json!({ "entry_ids": [entry["id"]], "supplier_id": 2, "buyer": "procurement" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "no_supply_agreement");
}

#[tokio::test]
async fn test_shortage_quantity_overflow_is_bad_request() {
    let (app, _) = setup(Money::zero(), 1).await;
    let (status, _) = send(
        &app,
        "POST",
        "/shortages",
        Some(json!({ "book_id": "B1", "quantity": u32::MAX })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = send(
        &app,
        "POST",
        "/shortages",
        Some(json!({ "book_id": "B1", "quantity": 2 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_quantity");
    let (_, pending) = send(&app, "GET", "/shortages?status=PENDING", None).await;
    assert_eq!(pending[0]["required_quantity"], u32::MAX);
}
