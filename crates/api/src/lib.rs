//! HTTP API server for the bookstore fulfillment engine.
//!
//! Exposes checkout, shortage decisions, payment, shipping, receipt, backlog
//! administration and procurement as REST endpoints, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod seed;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use fulfillment::{FulfillmentService, LogNotifier, ProcurementService};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub fulfillment: FulfillmentService<S, LogNotifier>,
    pub procurement: ProcurementService<S>,
}

/// Creates the application state over one store.
pub fn create_default_state<S: Store + Clone + 'static>(store: S) -> Arc<AppState<S>> {
    Arc::new(AppState {
        fulfillment: FulfillmentService::new(store.clone(), LogNotifier),
        procurement: ProcurementService::new(store),
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/customers/{id}/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/orders/{id}/shortages",
            get(routes::orders::shortages::<S>),
        )
        .route(
            "/orders/{id}/shortages/decision",
            post(routes::orders::decide::<S>),
        )
        .route("/orders/{id}/pay", post(routes::orders::pay::<S>))
        .route("/orders/{id}/ship", post(routes::orders::ship::<S>))
        .route("/orders/{id}/receive", post(routes::orders::receive::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/orders/{id}/events", get(routes::orders::events::<S>))
        .route(
            "/shortage-requests",
            get(routes::shortages::pending_requests::<S>),
        )
        .route(
            "/shortage-requests/{id}/accept",
            post(routes::shortages::accept::<S>),
        )
        .route(
            "/shortage-requests/{id}/reject",
            post(routes::shortages::reject::<S>),
        )
        .route(
            "/shortages",
            get(routes::shortages::list::<S>).post(routes::shortages::raise::<S>),
        )
        .route(
            "/purchase-orders",
            post(routes::purchase_orders::create::<S>),
        )
        .route(
            "/purchase-orders/{id}",
            get(routes::purchase_orders::get::<S>),
        )
        .route(
            "/purchase-orders/{id}/receive",
            post(routes::purchase_orders::receive::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
