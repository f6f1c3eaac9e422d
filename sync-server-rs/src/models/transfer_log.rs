//! Persisted per-file transfer records.
//!
//! One row per `(job_id, file_name, agent_id, started_at)`; the version
//! column makes every write a guarded UPSERT so concurrent reconcilers
//! cannot regress state.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTransferLog {
    pub id: String,
    pub job_id: String,
    pub job_name: String,
    pub agent_id: String,
    pub file_name: String,
    pub file_path: Option<String>,
    pub file_size: i64,
    pub delta_bytes_transferred: Option<i64>,
    pub status: String,
    pub action: String,
    pub progress: f64,
    pub transfer_rate: f64,
    pub duration: f64,
    pub error_message: Option<String>,
    pub started_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub version: i64,
    pub last_event_hash: String,
    pub created_at: String,
}

impl FileTransferLog {
    /// A fresh `pending` placeholder for a key that has no row yet.
    pub fn placeholder(job_id: &str, file_name: &str, agent_id: &str, started_at: &str) -> Self {
        let now = timestamp(Utc::now());
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            job_name: String::new(),
            agent_id: agent_id.to_string(),
            file_name: file_name.to_string(),
            file_path: None,
            file_size: 0,
            delta_bytes_transferred: None,
            status: "pending".to_string(),
            action: "update".to_string(),
            progress: 0.0,
            transfer_rate: 0.0,
            duration: 0.0,
            error_message: None,
            started_at: started_at.to_string(),
            updated_at: now.clone(),
            completed_at: None,
            version: 0,
            last_event_hash: String::new(),
            created_at: now,
        }
    }
}

/// Fixed-width UTC timestamp; lexicographic order matches time order.
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub(crate) fn row_to_log(row: &Row) -> rusqlite::Result<FileTransferLog> {
    Ok(FileTransferLog {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        job_name: row.get("job_name")?,
        agent_id: row.get("agent_id")?,
        file_name: row.get("file_name")?,
        file_path: row.get("file_path")?,
        file_size: row.get("file_size")?,
        delta_bytes_transferred: row.get("delta_bytes_transferred")?,
        status: row.get("status")?,
        action: row.get("action")?,
        progress: row.get("progress")?,
        transfer_rate: row.get("transfer_rate")?,
        duration: row.get("duration")?,
        error_message: row.get("error_message")?,
        started_at: row.get("started_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
        version: row.get("version")?,
        last_event_hash: row.get("last_event_hash")?,
        created_at: row.get("created_at")?,
    })
}

/// Latest row for a `(job, file, agent)` triple across retry epochs.
pub fn find_latest(
    conn: &Connection,
    job_id: &str,
    file_name: &str,
    agent_id: &str,
) -> anyhow::Result<Option<FileTransferLog>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM file_transfer_logs
         WHERE job_id = ? AND file_name = ? AND agent_id = ?
         ORDER BY started_at DESC, version DESC LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![job_id, file_name, agent_id], row_to_log)?;
    Ok(rows.next().and_then(|r| r.ok()))
}

pub fn find_all_for_key(
    conn: &Connection,
    job_id: &str,
    file_name: &str,
    agent_id: &str,
) -> anyhow::Result<Vec<FileTransferLog>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM file_transfer_logs
         WHERE job_id = ? AND file_name = ? AND agent_id = ?
         ORDER BY started_at ASC",
    )?;
    let rows = stmt.query_map(params![job_id, file_name, agent_id], row_to_log)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Version-guarded UPSERT.
///
/// Inserts the row, or updates the stored one only when the incoming
/// version is strictly newer. Returns `false` when the write lost to a
/// concurrent newer version (a no-op by design).
pub fn upsert_guarded(conn: &Connection, log: &FileTransferLog) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "INSERT INTO file_transfer_logs (
            id, job_id, job_name, agent_id, file_name, file_path, file_size,
            delta_bytes_transferred, status, action, progress, transfer_rate,
            duration, error_message, started_at, updated_at, completed_at,
            version, last_event_hash, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
         ON CONFLICT(job_id, file_name, agent_id, started_at) DO UPDATE SET
            job_name = excluded.job_name,
            file_path = COALESCE(excluded.file_path, file_path),
            file_size = excluded.file_size,
            delta_bytes_transferred = COALESCE(excluded.delta_bytes_transferred, delta_bytes_transferred),
            status = excluded.status,
            action = excluded.action,
            progress = excluded.progress,
            transfer_rate = excluded.transfer_rate,
            duration = excluded.duration,
            error_message = excluded.error_message,
            updated_at = excluded.updated_at,
            completed_at = excluded.completed_at,
            version = excluded.version,
            last_event_hash = excluded.last_event_hash
         WHERE excluded.version > file_transfer_logs.version",
        params![
            log.id,
            log.job_id,
            log.job_name,
            log.agent_id,
            log.file_name,
            log.file_path,
            log.file_size,
            log.delta_bytes_transferred,
            log.status,
            log.action,
            log.progress,
            log.transfer_rate,
            log.duration,
            log.error_message,
            log.started_at,
            log.updated_at,
            log.completed_at,
            log.version,
            log.last_event_hash,
            log.created_at,
        ],
    )?;
    Ok(changed > 0)
}
