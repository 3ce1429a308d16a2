//! HTTP delivery layer for tether
//!
//! The router exposes a small management API under `/api` and hands every
//! other request to the script handlers registered in the engine.

pub mod error;
pub mod handlers;
pub mod request_id;
pub mod startup;

pub use error::{ServerError, ServerResult};
pub use request_id::{RequestId, REQUEST_ID_HEADER};
pub use startup::{build_engine, serve};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tether_runtime::Engine;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Largest body buffered for a script handler
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, max_body_bytes: usize) -> Self {
        Self {
            engine,
            max_body_bytes,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/execute", post(handlers::execute))
        .route("/api/executions", get(handlers::executions))
        .route("/api/requests", get(handlers::requests))
        .route("/api/requests/stats", get(handlers::request_stats))
        .route("/api/requests/{id}", get(handlers::request))
        .route("/api/routes", get(handlers::routes))
        .fallback(handlers::dispatch)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id::request_id_middleware))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}
