use crate::db::connection::DbPool;
use std::fs;
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL DEFAULT '',
  hostname TEXT NOT NULL DEFAULT '',
  status TEXT NOT NULL DEFAULT 'disconnected' CHECK(status IN ('connected','disconnected')),
  version TEXT,
  last_seen_at TEXT,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS sync_jobs (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  source_agent_id TEXT REFERENCES agents(id) ON DELETE SET NULL,
  dest_agent_id TEXT REFERENCES agents(id) ON DELETE SET NULL,
  enabled INTEGER NOT NULL DEFAULT 1,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  username TEXT NOT NULL UNIQUE,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS file_transfer_logs (
  id TEXT PRIMARY KEY,
  job_id TEXT NOT NULL,
  job_name TEXT NOT NULL DEFAULT '',
  agent_id TEXT NOT NULL,
  file_name TEXT NOT NULL,
  file_path TEXT,
  file_size INTEGER NOT NULL DEFAULT 0,
  delta_bytes_transferred INTEGER,
  status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','started','in_progress','completed','failed')),
  action TEXT NOT NULL DEFAULT 'update' CHECK(action IN ('update','delete','metadata')),
  progress REAL NOT NULL DEFAULT 0,
  transfer_rate REAL NOT NULL DEFAULT 0,
  duration REAL NOT NULL DEFAULT 0,
  error_message TEXT,
  started_at TEXT NOT NULL,
  updated_at TEXT NOT NULL DEFAULT (datetime('now')),
  completed_at TEXT,
  version INTEGER NOT NULL DEFAULT 1,
  last_event_hash TEXT NOT NULL DEFAULT '',
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  UNIQUE(job_id, file_name, agent_id, started_at)
);

CREATE INDEX IF NOT EXISTS idx_transfer_logs_key
  ON file_transfer_logs(job_id, file_name, agent_id, started_at DESC);
CREATE INDEX IF NOT EXISTS idx_transfer_logs_completed_at
  ON file_transfer_logs(completed_at DESC);
CREATE INDEX IF NOT EXISTS idx_transfer_logs_status
  ON file_transfer_logs(status);
CREATE INDEX IF NOT EXISTS idx_transfer_logs_agent
  ON file_transfer_logs(agent_id);
"#;

pub fn migrate(pool: &DbPool, data_dir: &Path) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    fs::create_dir_all(data_dir)?;

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    // Idempotent migrations for existing databases
    let has_column = |table: &str, column: &str| -> bool {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        columns.contains(&column.to_string())
    };

    // file_transfer_logs migrations: the concurrency columns arrived after
    // the first deployments.
    if !has_column("file_transfer_logs", "version") {
        conn.execute_batch(
            "ALTER TABLE file_transfer_logs ADD COLUMN version INTEGER NOT NULL DEFAULT 1",
        )?;
    }
    if !has_column("file_transfer_logs", "last_event_hash") {
        conn.execute_batch(
            "ALTER TABLE file_transfer_logs ADD COLUMN last_event_hash TEXT NOT NULL DEFAULT ''",
        )?;
    }
    if !has_column("file_transfer_logs", "delta_bytes_transferred") {
        conn.execute_batch(
            "ALTER TABLE file_transfer_logs ADD COLUMN delta_bytes_transferred INTEGER",
        )?;
    }

    // agents migrations
    if !has_column("agents", "version") {
        conn.execute_batch("ALTER TABLE agents ADD COLUMN version TEXT")?;
    }
    if !has_column("agents", "last_seen_at") {
        conn.execute_batch("ALTER TABLE agents ADD COLUMN last_seen_at TEXT")?;
    }

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}
