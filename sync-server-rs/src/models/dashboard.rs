//! Derived dashboard views.
//!
//! All of these are computed by read queries against the transfer log; no
//! separate writer maintains them. Callers carrying an agent allow-list get
//! row-level filtering: a row is visible when its reporting agent, or the
//! source/destination agent of its job, lies in the allowed set.

use crate::models::transfer_log::{self, FileTransferLog};
use chrono::{Days, Utc};
use rusqlite::types::ToSql;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_agents: i64,
    pub total_active_jobs: i64,
    pub total_users: i64,
    pub total_files: i64,
    pub total_data_transferred: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTransferStat {
    pub date: String,
    pub file_count: i64,
    pub total_bytes: i64,
    pub date_label: String,
    pub day_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPerformance {
    pub job_id: String,
    pub job_name: String,
    pub file_count: i64,
    pub total_bytes: i64,
    pub rank: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub destinations_by_status: HashMap<String, i64>,
    pub total_files: i64,
    pub total_delta_bytes: i64,
    pub total_file_bytes: i64,
    pub compression_ratio: Option<f64>,
    pub last_sync_at: Option<String>,
}

/// Build the allow-list predicate for `file_transfer_logs` rows.
///
/// Returns an always-true clause when no list is given (unscoped callers
/// see the unrestricted aggregate).
fn scope_clause(allowed: Option<&[String]>) -> (String, Vec<Box<dyn ToSql>>) {
    match allowed {
        None => ("1 = 1".to_string(), Vec::new()),
        Some(agents) if agents.is_empty() => ("1 = 0".to_string(), Vec::new()),
        Some(agents) => {
            let placeholders = vec!["?"; agents.len()].join(", ");
            let clause = format!(
                "(agent_id IN ({ph}) OR job_id IN (
                    SELECT id FROM sync_jobs
                    WHERE source_agent_id IN ({ph}) OR dest_agent_id IN ({ph})
                 ))",
                ph = placeholders
            );
            let mut params: Vec<Box<dyn ToSql>> = Vec::with_capacity(agents.len() * 3);
            for _ in 0..3 {
                for agent in agents {
                    params.push(Box::new(agent.clone()));
                }
            }
            (clause, params)
        }
    }
}

fn as_params(boxed: &[Box<dyn ToSql>]) -> Vec<&dyn ToSql> {
    boxed.iter().map(|b| b.as_ref()).collect()
}

pub fn dashboard_stats(
    conn: &Connection,
    allowed: Option<&[String]>,
) -> anyhow::Result<DashboardStats> {
    let (scope, scope_params) = scope_clause(allowed);

    let sql = format!(
        "SELECT COUNT(*), COALESCE(SUM(COALESCE(delta_bytes_transferred, file_size)), 0)
         FROM file_transfer_logs
         WHERE status = 'completed' AND {scope}"
    );
    let (total_files, total_data_transferred) = conn.query_row(
        &sql,
        as_params(&scope_params).as_slice(),
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
    )?;

    Ok(DashboardStats {
        total_agents: crate::models::agent::count(conn)?,
        total_active_jobs: crate::models::sync_job::count_active(conn)?,
        total_users: crate::models::user::count(conn)?,
        total_files,
        total_data_transferred,
    })
}

/// Completed-transfer counts and byte totals for the last 7 days, zero
/// padded for days without transfers.
pub fn daily_transfer_stats(
    conn: &Connection,
    allowed: Option<&[String]>,
) -> anyhow::Result<Vec<DailyTransferStat>> {
    let (scope, scope_params) = scope_clause(allowed);

    let sql = format!(
        "SELECT date(completed_at), COUNT(*),
                COALESCE(SUM(COALESCE(delta_bytes_transferred, file_size)), 0)
         FROM file_transfer_logs
         WHERE status = 'completed'
           AND completed_at IS NOT NULL
           AND date(completed_at) >= date('now', '-6 days')
           AND {scope}
         GROUP BY date(completed_at)"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(as_params(&scope_params).as_slice(), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    let by_day: HashMap<String, (i64, i64)> = rows
        .filter_map(|r| r.ok())
        .map(|(day, count, bytes)| (day, (count, bytes)))
        .collect();

    let today = Utc::now().date_naive();
    let mut stats = Vec::with_capacity(7);
    for offset in (0..7).rev() {
        let day = today - Days::new(offset);
        let key = day.format("%Y-%m-%d").to_string();
        let (file_count, total_bytes) = by_day.get(&key).copied().unwrap_or((0, 0));
        stats.push(DailyTransferStat {
            date: key,
            file_count,
            total_bytes,
            date_label: day.format("%b %d").to_string(),
            day_name: day.format("%A").to_string(),
        });
    }
    Ok(stats)
}

fn top_jobs(
    conn: &Connection,
    allowed: Option<&[String]>,
    order_by: &str,
) -> anyhow::Result<Vec<JobPerformance>> {
    let (scope, scope_params) = scope_clause(allowed);

    let sql = format!(
        "SELECT t.job_id, MAX(t.job_name), COUNT(*) AS file_count,
                COALESCE(SUM(COALESCE(t.delta_bytes_transferred, t.file_size)), 0) AS total_bytes
         FROM file_transfer_logs t
         WHERE t.status = 'completed' AND {scope}
         GROUP BY t.job_id
         ORDER BY {order_by} DESC
         LIMIT 5"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(as_params(&scope_params).as_slice(), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    // Dense ranking: equal metric values share a rank.
    let mut jobs = Vec::new();
    let mut rank = 0i64;
    let mut previous: Option<i64> = None;
    for (job_id, job_name, file_count, total_bytes) in rows.filter_map(|r| r.ok()) {
        let metric = if order_by == "file_count" {
            file_count
        } else {
            total_bytes
        };
        if previous != Some(metric) {
            rank += 1;
            previous = Some(metric);
        }
        jobs.push(JobPerformance {
            job_id,
            job_name,
            file_count,
            total_bytes,
            rank,
        });
    }
    Ok(jobs)
}

pub fn top_jobs_by_file_count(
    conn: &Connection,
    allowed: Option<&[String]>,
) -> anyhow::Result<Vec<JobPerformance>> {
    top_jobs(conn, allowed, "file_count")
}

pub fn top_jobs_by_data_size(
    conn: &Connection,
    allowed: Option<&[String]>,
) -> anyhow::Result<Vec<JobPerformance>> {
    top_jobs(conn, allowed, "total_bytes")
}

/// The most recent completed transfers, newest first.
pub fn recent_completed(
    conn: &Connection,
    allowed: Option<&[String]>,
    limit: i64,
) -> anyhow::Result<Vec<FileTransferLog>> {
    let (scope, mut scope_params) = scope_clause(allowed);

    let sql = format!(
        "SELECT * FROM file_transfer_logs
         WHERE status = 'completed' AND {scope}
         ORDER BY completed_at DESC
         LIMIT ?"
    );
    scope_params.push(Box::new(limit));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(as_params(&scope_params).as_slice(), transfer_log::row_to_log)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Roll-up for a single job. Destination counts reflect the latest record
/// per agent, not the whole history.
pub fn job_summary(conn: &Connection, job_id: &str) -> anyhow::Result<JobSummary> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM (
            SELECT status,
                   ROW_NUMBER() OVER (
                       PARTITION BY agent_id
                       ORDER BY started_at DESC, version DESC
                   ) AS rn
            FROM file_transfer_logs WHERE job_id = ?
         ) WHERE rn = 1 GROUP BY status",
    )?;
    let rows = stmt.query_map([job_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let destinations_by_status: HashMap<String, i64> = rows.filter_map(|r| r.ok()).collect();

    let (total_files, total_delta_bytes, total_file_bytes, last_sync_at) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(COALESCE(delta_bytes_transferred, file_size)), 0),
                COALESCE(SUM(file_size), 0),
                MAX(completed_at)
         FROM file_transfer_logs
         WHERE job_id = ? AND status = 'completed'",
        [job_id],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        },
    )?;

    let compression_ratio = if total_file_bytes > 0 {
        Some(total_delta_bytes as f64 / total_file_bytes as f64)
    } else {
        None
    };

    Ok(JobSummary {
        job_id: job_id.to_string(),
        destinations_by_status,
        total_files,
        total_delta_bytes,
        total_file_bytes,
        compression_ratio,
        last_sync_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;
    use crate::db::migrate::migrate;
    use crate::models::transfer_log::{timestamp, upsert_guarded, FileTransferLog};
    use chrono::Duration;

    fn test_pool() -> (tempfile::TempDir, crate::db::connection::DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(dir.path().join("test.db").to_str().unwrap());
        migrate(&pool, dir.path()).unwrap();
        (dir, pool)
    }

    fn completed(
        job_id: &str,
        file_name: &str,
        agent_id: &str,
        delta: i64,
        size: i64,
        completed_at: chrono::DateTime<Utc>,
    ) -> FileTransferLog {
        let mut log =
            FileTransferLog::placeholder(job_id, file_name, agent_id, &timestamp(completed_at));
        log.job_name = format!("{} job", job_id);
        log.status = "completed".to_string();
        log.progress = 100.0;
        log.file_size = size;
        log.delta_bytes_transferred = Some(delta);
        log.completed_at = Some(timestamp(completed_at));
        log.version = 1;
        log
    }

    #[test]
    fn test_daily_stats_zero_padded() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();

        let now = Utc::now();
        upsert_guarded(&conn, &completed("job-1", "a.txt", "agent-1", 100, 400, now)).unwrap();
        upsert_guarded(&conn, &completed("job-1", "b.txt", "agent-1", 50, 200, now)).unwrap();

        let stats = daily_transfer_stats(&conn, None).unwrap();
        assert_eq!(stats.len(), 7);

        let today = stats.last().unwrap();
        assert_eq!(today.file_count, 2);
        assert_eq!(today.total_bytes, 150);
        assert!(!today.day_name.is_empty());

        // Remaining days are zero padded.
        for day in &stats[..6] {
            assert_eq!(day.file_count, 0);
            assert_eq!(day.total_bytes, 0);
        }
    }

    #[test]
    fn test_daily_stats_fall_back_to_file_size() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();

        let now = Utc::now();
        let mut log = completed("job-1", "a.txt", "agent-1", 0, 400, now);
        log.delta_bytes_transferred = None;
        upsert_guarded(&conn, &log).unwrap();

        let stats = daily_transfer_stats(&conn, None).unwrap();
        assert_eq!(stats.last().unwrap().total_bytes, 400);
    }

    #[test]
    fn test_top_jobs_dense_ranking() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();

        let now = Utc::now();
        // job-a: 2 files, job-b: 2 files, job-c: 1 file.
        upsert_guarded(&conn, &completed("job-a", "1.txt", "agent-1", 10, 10, now)).unwrap();
        upsert_guarded(&conn, &completed("job-a", "2.txt", "agent-1", 10, 10, now)).unwrap();
        upsert_guarded(&conn, &completed("job-b", "3.txt", "agent-1", 10, 10, now)).unwrap();
        upsert_guarded(&conn, &completed("job-b", "4.txt", "agent-1", 10, 10, now)).unwrap();
        upsert_guarded(&conn, &completed("job-c", "5.txt", "agent-1", 10, 10, now)).unwrap();

        let jobs = top_jobs_by_file_count(&conn, None).unwrap();
        assert_eq!(jobs.len(), 3);
        // Tied jobs share a rank; the next rank is dense.
        assert_eq!(jobs[0].rank, 1);
        assert_eq!(jobs[1].rank, 1);
        assert_eq!(jobs[2].rank, 2);
    }

    #[test]
    fn test_top_jobs_by_data_size_ordering() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();

        let now = Utc::now();
        upsert_guarded(&conn, &completed("small", "1.txt", "agent-1", 10, 10, now)).unwrap();
        upsert_guarded(&conn, &completed("large", "2.txt", "agent-1", 9000, 9000, now)).unwrap();

        let jobs = top_jobs_by_data_size(&conn, None).unwrap();
        assert_eq!(jobs[0].job_id, "large");
        assert_eq!(jobs[0].total_bytes, 9000);
    }

    #[test]
    fn test_recent_completed_limit_and_order() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();

        let base = Utc::now() - Duration::hours(1);
        for i in 0..8 {
            upsert_guarded(
                &conn,
                &completed(
                    "job-1",
                    &format!("f{}.txt", i),
                    "agent-1",
                    10,
                    10,
                    base + Duration::minutes(i),
                ),
            )
            .unwrap();
        }

        let recent = recent_completed(&conn, None, 5).unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].file_name, "f7.txt");
        assert_eq!(recent[4].file_name, "f3.txt");
    }

    #[test]
    fn test_agent_scoping() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();

        let now = Utc::now();
        upsert_guarded(&conn, &completed("job-1", "a.txt", "agent-1", 100, 100, now)).unwrap();
        upsert_guarded(&conn, &completed("job-2", "b.txt", "agent-2", 200, 200, now)).unwrap();

        let allow = vec!["agent-1".to_string()];
        let scoped = recent_completed(&conn, Some(&allow), 5).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].agent_id, "agent-1");

        let unscoped = recent_completed(&conn, None, 5).unwrap();
        assert_eq!(unscoped.len(), 2);

        let stats = dashboard_stats(&conn, Some(&allow)).unwrap();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.total_data_transferred, 100);
    }

    #[test]
    fn test_scoping_via_job_source_agent() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();

        conn.execute(
            "INSERT INTO agents (id, name, hostname) VALUES ('agent-src', 'Src', 'h1'), ('agent-dst', 'Dst', 'h2')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO sync_jobs (id, name, source_agent_id, dest_agent_id)
             VALUES ('job-1', 'Job One', 'agent-src', 'agent-dst')",
            [],
        )
        .unwrap();

        let now = Utc::now();
        // Reported by a third agent, but the job belongs to agent-src.
        upsert_guarded(&conn, &completed("job-1", "a.txt", "agent-3", 10, 10, now)).unwrap();

        let allow = vec!["agent-src".to_string()];
        let scoped = recent_completed(&conn, Some(&allow), 5).unwrap();
        assert_eq!(scoped.len(), 1);
    }

    #[test]
    fn test_job_summary() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();

        let now = Utc::now();
        upsert_guarded(&conn, &completed("job-1", "a.txt", "agent-1", 50, 100, now)).unwrap();
        upsert_guarded(&conn, &completed("job-1", "b.txt", "agent-2", 25, 100, now)).unwrap();

        let summary = job_summary(&conn, "job-1").unwrap();
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.total_delta_bytes, 75);
        assert_eq!(summary.total_file_bytes, 200);
        assert_eq!(summary.destinations_by_status.get("completed"), Some(&2));
        assert!((summary.compression_ratio.unwrap() - 0.375).abs() < f64::EPSILON);
        assert!(summary.last_sync_at.is_some());
    }
}
