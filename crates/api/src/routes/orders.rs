//! Order lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CustomerId, OrderId};
use domain::{LineShortage, Order, ShortageDecision};
use fulfillment::{
    CreateOrder, LineQuantity, OrderDetail, OrderItem, ReceiptRequest, ShipmentOutcome,
    ShipmentRequest,
};
use serde::Deserialize;
use store::{RecordedEvent, Store};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItem>,
    pub shipping_address: Option<String>,
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub decision: ShortageDecision,
    pub note: Option<String>,
}

/// An empty `lines` list ships everything still to ship.
#[derive(Deserialize)]
pub struct ShipRequest {
    #[serde(default)]
    pub lines: Vec<LineQuantity>,
    pub carrier: String,
    pub tracking_number: String,
    pub operator: String,
}

// -- Handlers --

/// POST /customers/{id}/orders — check out.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(customer_id): Path<CustomerId>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state
        .fulfillment
        .create_order(CreateOrder {
            customer_id,
            items: req.items,
            shipping_address: req.shipping_address,
            note: req.note,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id} — order with lines, shipments and shortage requests.
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<OrderDetail>, ApiError> {
    Ok(Json(state.fulfillment.order_detail(order_id).await?))
}

/// GET /orders/{id}/shortages — lines the stock cannot cover.
pub async fn shortages<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Vec<LineShortage>>, ApiError> {
    Ok(Json(
        state.fulfillment.list_shortages_for_order(order_id).await?,
    ))
}

/// POST /orders/{id}/shortages/decision
#[tracing::instrument(skip(state, req))]
pub async fn decide<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<OrderId>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .fulfillment
        .decide_shortage(order_id, req.decision, req.note)
        .await?;
    Ok(Json(order))
}

/// POST /orders/{id}/pay
#[tracing::instrument(skip(state))]
pub async fn pay<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.fulfillment.pay(order_id).await?))
}

/// POST /orders/{id}/ship
#[tracing::instrument(skip(state, req))]
pub async fn ship<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<OrderId>,
    Json(req): Json<ShipRequest>,
) -> Result<(StatusCode, Json<ShipmentOutcome>), ApiError> {
    if req.carrier.trim().is_empty() {
        return Err(ApiError::BadRequest("carrier is required".to_string()));
    }

    let outcome = if req.lines.is_empty() {
        state
            .fulfillment
            .ship_all(order_id, req.carrier, req.tracking_number, req.operator)
            .await?
    } else {
        state
            .fulfillment
            .ship(
                order_id,
                ShipmentRequest {
                    lines: req.lines,
                    carrier: req.carrier,
                    tracking_number: req.tracking_number,
                    operator: req.operator,
                },
            )
            .await?
    };
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /orders/{id}/receive — by shipment or by lines.
#[tracing::instrument(skip(state, req))]
pub async fn receive<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<OrderId>,
    Json(req): Json<ReceiptRequest>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.fulfillment.confirm_receipt(order_id, req).await?))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state))]
pub async fn cancel<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.fulfillment.cancel(order_id).await?))
}

/// GET /orders/{id}/events — outbox events of the order.
pub async fn events<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Vec<RecordedEvent>>, ApiError> {
    Ok(Json(state.fulfillment.order_events(order_id).await?))
}
