//! HTTP endpoints for parch-relay.
//!
//! Health and metrics for operators, and the WebSocket upgrade clients and
//! host authors connect through.

pub mod health;
mod metrics;
mod ws;

use crate::server::Relay;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<Relay>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health_handler))
        .route("/ws", get(ws::ws_handler));
    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }
    router.layer(Extension(relay))
}
