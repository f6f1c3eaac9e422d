use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub hostname: String,
    pub status: String,
    pub version: Option<String>,
    pub last_seen_at: Option<String>,
    pub created_at: String,
}

fn row_to_agent(row: &Row) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get("id")?,
        name: row.get("name")?,
        hostname: row.get("hostname")?,
        status: row.get("status")?,
        version: row.get("version")?,
        last_seen_at: row.get("last_seen_at")?,
        created_at: row.get("created_at")?,
    })
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Agent>> {
    let mut stmt = conn.prepare("SELECT * FROM agents WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_agent)?;
    Ok(rows.next().and_then(|r| r.ok()))
}

pub fn count(conn: &Connection) -> anyhow::Result<i64> {
    let n = conn.query_row("SELECT COUNT(*) FROM agents", [], |row| row.get(0))?;
    Ok(n)
}

/// Record an agent registration; creates the row on first contact.
pub fn upsert_seen(
    conn: &Connection,
    id: &str,
    hostname: &str,
    version: &str,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO agents (id, name, hostname, status, version, last_seen_at)
         VALUES (?1, ?1, ?2, 'connected', ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            hostname = excluded.hostname,
            status = 'connected',
            version = excluded.version,
            last_seen_at = excluded.last_seen_at",
        params![id, hostname, version, now],
    )?;
    Ok(())
}

pub fn mark_disconnected(conn: &Connection, id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE agents SET status = 'disconnected', last_seen_at = ? WHERE id = ?",
        params![chrono::Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;
    use crate::db::migrate::migrate;

    #[test]
    fn test_upsert_seen_and_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(dir.path().join("test.db").to_str().unwrap());
        migrate(&pool, dir.path()).unwrap();
        let conn = pool.get().unwrap();

        upsert_seen(&conn, "agent-1", "host-a", "1.0.0").unwrap();
        upsert_seen(&conn, "agent-1", "host-b", "1.0.1").unwrap();
        assert_eq!(count(&conn).unwrap(), 1);

        let agent = find_by_id(&conn, "agent-1").unwrap().unwrap();
        assert_eq!(agent.hostname, "host-b");
        assert_eq!(agent.status, "connected");

        mark_disconnected(&conn, "agent-1").unwrap();
        let agent = find_by_id(&conn, "agent-1").unwrap().unwrap();
        assert_eq!(agent.status, "disconnected");
    }
}
