pub mod dashboard;
pub mod jobs;
pub mod stats;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/dashboard", dashboard::router(state.clone()))
        .nest("/api/jobs", jobs::router(state.clone()))
        .route("/api/stats", axum::routing::get(stats::ingest_stats))
        .route("/api/sessions", axum::routing::get(stats::sessions))
        .route("/ws", axum::routing::get(crate::ws::ui::ws_handler))
        .route("/ws/agent", axum::routing::get(crate::ws::agent_registry::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Parse the optional comma-separated agent allow-list.
///
/// The list is attached by the auth layer upstream of this core; callers
/// without one see the unrestricted aggregate.
pub(crate) fn parse_allowed(agents: &Option<String>) -> Option<Vec<String>> {
    agents.as_ref().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}
