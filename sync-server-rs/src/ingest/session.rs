//! In-memory sync session tracking.
//!
//! A sync session is the temporal grouping of scan and transfer activity
//! for one job on one agent. Sessions are derived state: they are updated
//! as events flow through ingest and evicted once idle, never persisted.

use crate::ingest::event::NormalizedTransferEvent;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub job_id: String,
    pub agent_id: String,
    pub scan_started_at: Option<DateTime<Utc>>,
    pub scan_updated_at: Option<DateTime<Utc>>,
    pub transfer_started_at: Option<DateTime<Utc>>,
    pub last_transfer_at: Option<DateTime<Utc>>,
    pub file_count: u64,
    pub total_bytes: u64,
    pub peak_transfer_rate: f64,
    pub average_transfer_rate: f64,
    pub state: String,
}

impl SessionStats {
    fn new(job_id: &str, agent_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            agent_id: agent_id.to_string(),
            scan_started_at: None,
            scan_updated_at: None,
            transfer_started_at: None,
            last_transfer_at: None,
            file_count: 0,
            total_bytes: 0,
            peak_transfer_rate: 0.0,
            average_transfer_rate: 0.0,
            state: "idle".to_string(),
        }
    }

    fn touched_at(&self) -> Option<DateTime<Utc>> {
        [self.scan_updated_at, self.last_transfer_at, self.transfer_started_at]
            .into_iter()
            .flatten()
            .max()
    }
}

pub struct SessionTracker {
    sessions: RwLock<HashMap<(String, String), SessionStats>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Record folder-scan activity for a session.
    pub fn observe_scan(&self, job_id: &str, agent_id: &str, at: DateTime<Utc>) {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .entry((job_id.to_string(), agent_id.to_string()))
            .or_insert_with(|| SessionStats::new(job_id, agent_id));
        session.scan_started_at.get_or_insert(at);
        session.scan_updated_at = Some(at);
        session.state = "scanning".to_string();
    }

    /// Fold an applied transfer event into its session.
    pub fn observe_transfer(&self, ev: &NormalizedTransferEvent) {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .entry((ev.job_id.clone(), ev.agent_id.clone()))
            .or_insert_with(|| SessionStats::new(&ev.job_id, &ev.agent_id));

        session.transfer_started_at.get_or_insert(ev.timestamp);
        session.last_transfer_at = Some(ev.timestamp);
        session.state = "syncing".to_string();

        if ev.transfer_rate > session.peak_transfer_rate {
            session.peak_transfer_rate = ev.transfer_rate;
        }

        if matches!(ev.status, crate::ingest::event::TransferStatus::Completed) {
            session.file_count += 1;
            let bytes = if ev.delta_bytes_transferred > 0 {
                ev.delta_bytes_transferred
            } else {
                ev.file_size
            };
            session.total_bytes += bytes;
        }

        if let (Some(first), Some(last)) = (session.transfer_started_at, session.last_transfer_at) {
            let secs = (last - first).num_milliseconds() as f64 / 1000.0;
            if secs > 0.0 {
                session.average_transfer_rate = session.total_bytes as f64 / secs;
            }
        }
    }

    pub fn snapshot(&self) -> Vec<SessionStats> {
        let mut sessions: Vec<_> = self.sessions.read().unwrap().values().cloned().collect();
        sessions.sort_by(|a, b| (&a.job_id, &a.agent_id).cmp(&(&b.job_id, &b.agent_id)));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Evict sessions with no activity since the timeout.
    pub fn evict_idle(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let mut sessions = self.sessions.write().unwrap();
        let before = sessions.len();
        sessions.retain(|_, session| match session.touched_at() {
            Some(at) => now - at < timeout,
            None => false,
        });
        before - sessions.len()
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completed_event(bytes: u64, at: DateTime<Utc>) -> NormalizedTransferEvent {
        NormalizedTransferEvent::from_wire(
            "file_transfer_completed",
            at,
            &json!({
                "job_id": "job-1",
                "agent_id": "agent-1",
                "file_name": "a.txt",
                "status": "completed",
                "progress": 100.0,
                "delta_bytes_transferred": bytes,
                "transfer_rate": 512.0
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_transfer_accumulation() {
        let tracker = SessionTracker::new();
        let start = Utc::now();
        tracker.observe_transfer(&completed_event(100, start));
        tracker.observe_transfer(&completed_event(200, start + Duration::seconds(2)));

        let sessions = tracker.snapshot();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert_eq!(session.file_count, 2);
        assert_eq!(session.total_bytes, 300);
        assert_eq!(session.state, "syncing");
        assert!((session.peak_transfer_rate - 512.0).abs() < f64::EPSILON);
        assert!((session.average_transfer_rate - 150.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_scan_window() {
        let tracker = SessionTracker::new();
        let at = Utc::now();
        tracker.observe_scan("job-1", "agent-1", at);
        tracker.observe_scan("job-1", "agent-1", at + Duration::seconds(3));

        let session = &tracker.snapshot()[0];
        assert_eq!(session.scan_started_at, Some(at));
        assert_eq!(session.scan_updated_at, Some(at + Duration::seconds(3)));
        assert_eq!(session.state, "scanning");
    }

    #[test]
    fn test_evict_idle() {
        let tracker = SessionTracker::new();
        let old = Utc::now() - Duration::minutes(30);
        tracker.observe_scan("job-old", "agent-1", old);
        tracker.observe_scan("job-new", "agent-1", Utc::now());

        let evicted = tracker.evict_idle(Utc::now(), Duration::minutes(10));
        assert_eq!(evicted, 1);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.snapshot()[0].job_id, "job-new");
    }
}
