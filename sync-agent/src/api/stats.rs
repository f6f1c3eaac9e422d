//! Bridge counter endpoint.

use crate::api::AppState;
use axum::extract::State;
use axum::{response::IntoResponse, Json};

/// GET /stats - Bridge pipeline counters.
pub async fn bridge_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.bridge_stats.snapshot())
}
