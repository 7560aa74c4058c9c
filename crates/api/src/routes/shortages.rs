//! Shortage request review and backlog endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{BookId, ShortageRequestId};
use domain::{CustomerShortageRequest, Order, ShortageEntry, ShortageStatus};
use serde::Deserialize;
use store::Store;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<ShortageStatus>,
}

#[derive(Deserialize)]
pub struct RaiseRequest {
    pub book_id: BookId,
    pub quantity: u32,
    pub priority: Option<i32>,
}

/// GET /shortage-requests — requests waiting for review.
pub async fn pending_requests<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<CustomerShortageRequest>>, ApiError> {
    Ok(Json(state.fulfillment.list_pending_requests().await?))
}

/// POST /shortage-requests/{id}/accept
#[tracing::instrument(skip(state))]
pub async fn accept<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(request_id): Path<ShortageRequestId>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(
        state.fulfillment.accept_shortage_request(request_id).await?,
    ))
}

/// POST /shortage-requests/{id}/reject
#[tracing::instrument(skip(state))]
pub async fn reject<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(request_id): Path<ShortageRequestId>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(
        state.fulfillment.reject_shortage_request(request_id).await?,
    ))
}

/// GET /shortages?status= — backlog, highest priority first.
pub async fn list<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ShortageEntry>>, ApiError> {
    Ok(Json(state.fulfillment.list_shortages(query.status).await?))
}

/// POST /shortages — manual raise.
#[tracing::instrument(skip(state, req))]
pub async fn raise<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<RaiseRequest>,
) -> Result<(StatusCode, Json<ShortageEntry>), ApiError> {
    let entry = state
        .fulfillment
        .raise_manual_shortage(req.book_id, req.quantity, req.priority)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
