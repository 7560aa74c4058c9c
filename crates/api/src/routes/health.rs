//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use store::Store;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
}

/// GET /health — reports whether the store accepts a unit of work.
pub async fn check<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> (StatusCode, Json<HealthResponse>) {
    // Dropping the unit of work rolls it back.
    match state.fulfillment.store().begin().await {
        Ok(_uow) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                store: "reachable",
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "health check could not open a unit of work");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    store: "unreachable",
                }),
            )
        }
    }
}
