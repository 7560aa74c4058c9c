//! Procurement endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use common::{PurchaseOrderId, ShortageEntryId, SupplierId};
use domain::PurchaseOrder;
use serde::Deserialize;
use store::Store;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreatePurchaseRequest {
    pub entry_ids: Vec<ShortageEntryId>,
    pub supplier_id: SupplierId,
    pub expected_date: Option<NaiveDate>,
    pub buyer: String,
}

/// POST /purchase-orders — buy against backlog entries.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreatePurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseOrder>), ApiError> {
    let purchase = state
        .procurement
        .create_purchase_from_shortages(
            &req.entry_ids,
            req.supplier_id,
            req.expected_date,
            req.buyer,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}

/// GET /purchase-orders/{id}
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<PurchaseOrderId>,
) -> Result<Json<PurchaseOrder>, ApiError> {
    Ok(Json(state.procurement.get_purchase_order(id).await?))
}

/// POST /purchase-orders/{id}/receive
#[tracing::instrument(skip(state))]
pub async fn receive<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<PurchaseOrderId>,
) -> Result<Json<PurchaseOrder>, ApiError> {
    Ok(Json(state.procurement.receive_goods(id).await?))
}
