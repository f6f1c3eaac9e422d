use crate::state::AppState;
use axum::extract::State;
use axum::{response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

/// GET /api/stats - Ingest pipeline counters plus connected agents.
pub async fn ingest_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.manager.snapshot_metrics();
    let connected: Vec<_> = state
        .agents
        .connected_agents()
        .into_iter()
        .map(|(id, hostname, version)| {
            json!({ "agentId": id, "hostname": hostname, "version": version })
        })
        .collect();
    Json(json!({
        "ingest": snapshot,
        "connectedAgents": connected,
    }))
}

/// GET /api/sessions - Live sync sessions derived from ingest.
pub async fn sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.manager.sessions().snapshot())
}
