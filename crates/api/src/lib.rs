//! HTTP API server for the batch allocation service.
//!
//! Exposes the message bus over REST endpoints, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::TransactionalStore;
use metrics_exporter_prometheus::PrometheusHandle;
use service::{
    BusSettings, EventPublisher, Notifications, ServiceError, TracingEventPublisher,
    TracingNotifications, bootstrap,
};
use store::{AllocationsView, InMemoryStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/add_batch", post(routes::batches::add_batch))
        .route(
            "/change_batch_quantity",
            post(routes::batches::change_batch_quantity),
        )
        .route("/allocate", post(routes::allocations::allocate))
        .route("/allocations/{orderid}", get(routes::allocations::list))
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

/// Wires the message bus over `store` and its read model into application state.
pub fn create_state(
    store: Arc<dyn TransactionalStore>,
    allocations: Arc<dyn AllocationsView>,
    publisher: Arc<dyn EventPublisher>,
    notifications: Arc<dyn Notifications>,
    settings: &BusSettings,
) -> Result<Arc<AppState>, ServiceError> {
    let bus = bootstrap(store, publisher, notifications, settings)?;
    Ok(Arc::new(AppState { bus, allocations }))
}

/// Creates application state backed by an in-memory store, with events and
/// notifications written to the log.
pub fn create_in_memory_state(settings: &BusSettings) -> Result<Arc<AppState>, ServiceError> {
    let store = InMemoryStore::new();
    create_state(
        Arc::new(store.clone()),
        Arc::new(store),
        Arc::new(TracingEventPublisher),
        Arc::new(TracingNotifications),
        settings,
    )
}
