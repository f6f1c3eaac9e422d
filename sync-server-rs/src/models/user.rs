use rusqlite::Connection;

pub fn count(conn: &Connection) -> anyhow::Result<i64> {
    let n = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    Ok(n)
}
