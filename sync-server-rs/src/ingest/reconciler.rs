//! Applies normalized transfer events to persistent state.
//!
//! Every accepted event runs inside one database transaction: load the
//! latest row for its key, validate the state transition, merge the fields
//! the event is authoritative for, bump the version, and write through the
//! version-guarded UPSERT. Out-of-order and concurrent writers cannot
//! regress state; an older-version write is a no-op.

use crate::db::connection::DbPool;
use crate::ingest::event::{NormalizedTransferEvent, TransferEventKind};
use crate::ingest::hasher::{event_hash, DedupCache};
use crate::ingest::metrics::{IngestMetrics, MetricsSnapshot};
use crate::ingest::session::SessionTracker;
use crate::ingest::state_machine::{self, TransferState};
use crate::ingest::IngestError;
use crate::models::{sync_job, transfer_log};
use crate::models::transfer_log::{timestamp, FileTransferLog};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Outcome of reconciling a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The row was written at this version.
    Persisted { version: i64 },
    /// Hash seen within the dedup window.
    Duplicate,
    /// Inadmissible transition; persistent state untouched.
    Conflict,
    /// A newer version was already persisted; treated as success.
    VersionLost,
}

struct CachedTransfer {
    log: FileTransferLog,
    touched: DateTime<Utc>,
}

type ActiveKey = (String, String, String);

pub struct SyncStateManager {
    db: DbPool,
    dedup: DedupCache,
    active: RwLock<HashMap<ActiveKey, CachedTransfer>>,
    metrics: IngestMetrics,
    sessions: SessionTracker,
    dedup_window_secs: i64,
    state_timeout: Duration,
}

impl SyncStateManager {
    pub fn new(db: DbPool, dedup_window_secs: i64, state_timeout_secs: i64) -> Self {
        Self {
            db,
            dedup: DedupCache::new(dedup_window_secs),
            active: RwLock::new(HashMap::new()),
            metrics: IngestMetrics::default(),
            sessions: SessionTracker::new(),
            dedup_window_secs,
            state_timeout: Duration::seconds(state_timeout_secs),
        }
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn snapshot_metrics(&self) -> MetricsSnapshot {
        let active = self.active.read().unwrap().len();
        self.metrics.snapshot(active, self.dedup.len())
    }

    /// Reconcile one event against persistent state.
    pub async fn apply(&self, ev: NormalizedTransferEvent) -> Result<Applied, IngestError> {
        IngestMetrics::incr(&self.metrics.processed);

        let hash = event_hash(&ev);
        if self.dedup.check_and_insert(&hash, Utc::now()) {
            IngestMetrics::incr(&self.metrics.deduplicated);
            return Ok(Applied::Duplicate);
        }

        let db = self.db.clone();
        let blocking_ev = ev.clone();
        let (applied, row) = tokio::task::spawn_blocking(move || {
            apply_blocking(&db, &blocking_ev, &hash)
        })
        .await
        .map_err(|e| IngestError::TransientPersistence(e.to_string()))??;

        match &applied {
            Applied::Persisted { .. } => {
                if let Some(row) = row {
                    let key = (row.job_id.clone(), row.file_name.clone(), row.agent_id.clone());
                    self.active.write().unwrap().insert(
                        key,
                        CachedTransfer {
                            log: row,
                            touched: Utc::now(),
                        },
                    );
                }
                self.sessions.observe_transfer(&ev);
            }
            Applied::Conflict => IngestMetrics::incr(&self.metrics.conflicts),
            Applied::VersionLost => IngestMetrics::incr(&self.metrics.version_lost),
            Applied::Duplicate => {}
        }
        Ok(applied)
    }

    /// Record an unparseable or incomplete event.
    pub fn record_dropped(&self) {
        IngestMetrics::incr(&self.metrics.dropped);
    }

    /// Account for a `file_operations_summary` frame.
    pub fn record_summarized(&self, count: u64) {
        IngestMetrics::add(&self.metrics.summarized, count);
    }

    /// Most recent known state for a key, from the in-memory cache.
    pub fn cached_transfer(
        &self,
        job_id: &str,
        file_name: &str,
        agent_id: &str,
    ) -> Option<FileTransferLog> {
        let key = (job_id.to_string(), file_name.to_string(), agent_id.to_string());
        self.active.read().unwrap().get(&key).map(|c| c.log.clone())
    }

    pub fn active_count(&self) -> usize {
        self.active.read().unwrap().len()
    }

    /// Cleanup pass: purge the dedup cache past twice the window and evict
    /// idle in-memory transfer and session state. Persistent rows are
    /// untouched.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> (usize, usize) {
        self.dedup.purge(now);

        let evicted_transfers = {
            let mut active = self.active.write().unwrap();
            let before = active.len();
            active.retain(|_, cached| now - cached.touched < self.state_timeout);
            before - active.len()
        };
        let evicted_sessions = self.sessions.evict_idle(now, self.state_timeout);

        if evicted_transfers > 0 || evicted_sessions > 0 {
            debug!(
                "evicted {} idle transfers, {} idle sessions (dedup window {}s)",
                evicted_transfers, evicted_sessions, self.dedup_window_secs
            );
        }
        (evicted_transfers, evicted_sessions)
    }
}

fn apply_blocking(
    db: &DbPool,
    ev: &NormalizedTransferEvent,
    hash: &str,
) -> Result<(Applied, Option<FileTransferLog>), IngestError> {
    let mut conn = db.get()?;
    let tx = conn.transaction()?;

    let latest = transfer_log::find_latest(&tx, &ev.job_id, &ev.file_name, &ev.agent_id)
        .map_err(|e| IngestError::TransientPersistence(e.to_string()))?;

    // A fresh ItemStarted after a terminal record opens a new retry epoch
    // keyed by a later started_at; every other event works on the latest
    // row, or a pending placeholder when the key is new.
    let (mut row, current) = match &latest {
        Some(stored) => {
            let stored_state = TransferState::from_str(&stored.status)
                .ok_or_else(|| {
                    IngestError::FatalPersistence(format!("unknown stored status {}", stored.status))
                })?;
            if ev.kind == TransferEventKind::Started && stored_state.is_terminal() {
                let started_at = rekey_started_at(stored, ev.timestamp);
                (
                    FileTransferLog::placeholder(&ev.job_id, &ev.file_name, &ev.agent_id, &started_at),
                    TransferState::Pending,
                )
            } else {
                (stored.clone(), stored_state)
            }
        }
        None => (
            FileTransferLog::placeholder(
                &ev.job_id,
                &ev.file_name,
                &ev.agent_id,
                &timestamp(ev.timestamp),
            ),
            TransferState::Pending,
        ),
    };

    let next = match state_machine::next_state(current, ev.kind, ev.status) {
        Ok(next) => next,
        Err(conflict) => {
            debug!("rejecting event: {}", conflict);
            return Ok((Applied::Conflict, None));
        }
    };

    // Fill the job name forward from the job table on first contact.
    let job_name = if row.job_name.is_empty() {
        sync_job::find_by_id(&tx, &ev.job_id)
            .ok()
            .flatten()
            .map(|job| job.name)
    } else {
        None
    };

    merge_event(&mut row, ev, next, hash, job_name);

    let changed = transfer_log::upsert_guarded(&tx, &row)
        .map_err(|e| IngestError::TransientPersistence(e.to_string()))?;
    tx.commit()?;

    if changed {
        Ok((
            Applied::Persisted { version: row.version },
            Some(row),
        ))
    } else {
        Ok((Applied::VersionLost, None))
    }
}

/// Choose the started_at for a retry epoch. Identical upstream timestamps
/// are disambiguated with a sub-second bump past the stored epoch.
fn rekey_started_at(stored: &FileTransferLog, at: DateTime<Utc>) -> String {
    let candidate = timestamp(at);
    if candidate > stored.started_at {
        return candidate;
    }
    let previous: DateTime<Utc> = stored.started_at.parse().unwrap_or(at);
    timestamp(previous + Duration::microseconds(1))
}

/// Merge an event into a row, mutating only the fields its kind is
/// authoritative for.
fn merge_event(
    row: &mut FileTransferLog,
    ev: &NormalizedTransferEvent,
    next: TransferState,
    hash: &str,
    job_name: Option<String>,
) {
    // file_size is monotone: never shrink a known size.
    if ev.file_size > 0 {
        row.file_size = row.file_size.max(ev.file_size as i64);
    }

    match ev.kind {
        TransferEventKind::Started => {
            row.progress = 0.0;
            row.action = ev.action.clone();
        }
        TransferEventKind::Progress => {
            row.progress = ev.progress.clamp(0.0, 100.0);
            if ev.delta_bytes_transferred > 0 {
                row.delta_bytes_transferred = Some(ev.delta_bytes_transferred as i64);
            }
            if ev.transfer_rate > 0.0 {
                row.transfer_rate = ev.transfer_rate;
            }
        }
        TransferEventKind::Completed => {
            row.progress = 100.0;
            if ev.delta_bytes_transferred > 0 {
                row.delta_bytes_transferred = Some(ev.delta_bytes_transferred as i64);
            }
            if ev.transfer_rate > 0.0 {
                row.transfer_rate = ev.transfer_rate;
            }
            row.duration = ev.duration;
            if let Some(error) = &ev.error {
                row.error_message = Some(error.clone());
            }
            if row.completed_at.is_none() {
                row.completed_at = Some(timestamp(ev.timestamp));
            }
        }
    }

    // Fill-forward fields: never overwrite with empty.
    if row.job_name.is_empty() {
        if let Some(name) = job_name {
            row.job_name = name;
        }
    }
    if row.file_path.is_none() {
        row.file_path = ev.file_path.clone();
    }

    row.status = next.as_str().to_string();
    row.version += 1;
    row.last_event_hash = hash.to_string();
    row.updated_at = timestamp(Utc::now());
}
