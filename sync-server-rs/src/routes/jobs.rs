use crate::error::AppError;
use crate::models::{dashboard, sync_job};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route("/{id}/summary", get(job_summary))
}

async fn job_summary(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<dashboard::JobSummary>, AppError> {
    let db = state.db.clone();
    let id2 = id.clone();
    let summary = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        // Unknown jobs may still have transfer rows; only reject when
        // neither the job nor any transfer history exists.
        let summary = dashboard::job_summary(&conn, &id2)?;
        let known = sync_job::find_by_id(&conn, &id2)?.is_some();
        Ok::<_, anyhow::Error>((summary, known))
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    let (summary, known) = summary;
    if !known && summary.total_files == 0 && summary.destinations_by_status.is_empty() {
        return Err(AppError::NotFound("Job not found".into()));
    }
    Ok(Json(summary))
}
