//! Local HTTP API for the sync agent.
//!
//! Operators and the deployment tooling hit this surface directly; the
//! server never does.

pub mod health;
pub mod stats;

use crate::bridge::stats::BridgeStats;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub bridge_stats: Arc<BridgeStats>,
}

/// Create the API router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        .route("/stats", get(stats::bridge_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
