use crate::error::AppError;
use crate::models::dashboard;
use crate::routes::parse_allowed;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(dashboard_stats))
        .route("/daily", get(daily_transfer_stats))
        .route("/top-jobs", get(top_jobs))
        .route("/recent", get(recent_transfers))
}

#[derive(Deserialize)]
pub struct ScopeQuery {
    /// Comma-separated agent allow-list; absent means unscoped.
    pub agents: Option<String>,
}

async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<dashboard::DashboardStats>, AppError> {
    let allowed = parse_allowed(&query.agents);
    let db = state.db.clone();
    let stats = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        dashboard::dashboard_stats(&conn, allowed.as_deref())
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(stats))
}

async fn daily_transfer_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<Vec<dashboard::DailyTransferStat>>, AppError> {
    let allowed = parse_allowed(&query.agents);
    let db = state.db.clone();
    let stats = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        dashboard::daily_transfer_stats(&conn, allowed.as_deref())
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(stats))
}

#[derive(Deserialize)]
pub struct TopJobsQuery {
    pub agents: Option<String>,
    /// `files` (default) or `data`.
    pub by: Option<String>,
}

async fn top_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopJobsQuery>,
) -> Result<Json<Vec<dashboard::JobPerformance>>, AppError> {
    let by = query.by.as_deref().unwrap_or("files");
    if by != "files" && by != "data" {
        return Err(AppError::BadRequest("by must be 'files' or 'data'".into()));
    }

    let allowed = parse_allowed(&query.agents);
    let by_data = by == "data";
    let db = state.db.clone();
    let jobs = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        if by_data {
            dashboard::top_jobs_by_data_size(&conn, allowed.as_deref())
        } else {
            dashboard::top_jobs_by_file_count(&conn, allowed.as_deref())
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(jobs))
}

async fn recent_transfers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<Vec<crate::models::transfer_log::FileTransferLog>>, AppError> {
    let allowed = parse_allowed(&query.agents);
    let db = state.db.clone();
    let events = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        dashboard::recent_completed(&conn, allowed.as_deref(), 5)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(events))
}
