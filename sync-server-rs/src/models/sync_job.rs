use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub name: String,
    pub source_agent_id: Option<String>,
    pub dest_agent_id: Option<String>,
    pub enabled: i64,
    pub created_at: String,
}

fn row_to_job(row: &Row) -> rusqlite::Result<SyncJob> {
    Ok(SyncJob {
        id: row.get("id")?,
        name: row.get("name")?,
        source_agent_id: row.get("source_agent_id")?,
        dest_agent_id: row.get("dest_agent_id")?,
        enabled: row.get("enabled")?,
        created_at: row.get("created_at")?,
    })
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<SyncJob>> {
    let mut stmt = conn.prepare("SELECT * FROM sync_jobs WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_job)?;
    Ok(rows.next().and_then(|r| r.ok()))
}

pub fn count_active(conn: &Connection) -> anyhow::Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM sync_jobs WHERE enabled = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(n)
}
