//! Event content hashing and sliding-window deduplication.

use crate::ingest::event::NormalizedTransferEvent;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Content hash of an event.
///
/// Two events hash identically when they describe the same observation:
/// same key, kind, status, progress (to two decimals), and second-resolution
/// timestamp.
pub fn event_hash(ev: &NormalizedTransferEvent) -> String {
    let input = format!(
        "{}|{}|{}|{}|{}|{:.2}|{}",
        ev.job_id,
        ev.file_name,
        ev.agent_id,
        ev.kind.as_str(),
        ev.status.as_str(),
        ev.progress,
        ev.timestamp.timestamp(),
    );
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Sliding-window duplicate filter over event hashes.
///
/// Readers proceed concurrently; only inserts and purges take the write
/// lock.
pub struct DedupCache {
    window: Duration,
    seen: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl DedupCache {
    pub fn new(window_secs: i64) -> Self {
        Self {
            window: Duration::seconds(window_secs),
            seen: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `hash` was seen within the window; records it otherwise.
    pub fn check_and_insert(&self, hash: &str, now: DateTime<Utc>) -> bool {
        {
            let seen = self.seen.read().unwrap();
            if let Some(&at) = seen.get(hash) {
                if now - at < self.window {
                    return true;
                }
            }
        }
        self.seen.write().unwrap().insert(hash.to_string(), now);
        false
    }

    /// Drop entries older than twice the window.
    pub fn purge(&self, now: DateTime<Utc>) {
        let horizon = self.window * 2;
        self.seen
            .write()
            .unwrap()
            .retain(|_, &mut at| now - at < horizon);
    }

    pub fn len(&self) -> usize {
        self.seen.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::event::NormalizedTransferEvent;
    use serde_json::json;

    fn event(progress: f64, timestamp: DateTime<Utc>) -> NormalizedTransferEvent {
        NormalizedTransferEvent::from_wire(
            "file_transfer_progress",
            timestamp,
            &json!({
                "job_id": "job-1",
                "agent_id": "agent-1",
                "file_name": "a.txt",
                "status": "in_progress",
                "progress": progress
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_hash_is_stable() {
        let now = Utc::now();
        assert_eq!(event_hash(&event(50.0, now)), event_hash(&event(50.0, now)));
    }

    #[test]
    fn test_hash_differs_by_progress() {
        let now = Utc::now();
        assert_ne!(event_hash(&event(50.0, now)), event_hash(&event(50.01, now)));
    }

    #[test]
    fn test_hash_differs_by_timestamp_second() {
        let now = Utc::now();
        let later = now + Duration::seconds(1);
        assert_ne!(event_hash(&event(50.0, now)), event_hash(&event(50.0, later)));
    }

    #[test]
    fn test_duplicate_within_window() {
        let cache = DedupCache::new(30);
        let now = Utc::now();
        assert!(!cache.check_and_insert("abc", now));
        assert!(cache.check_and_insert("abc", now + Duration::seconds(5)));
    }

    #[test]
    fn test_not_duplicate_after_window() {
        let cache = DedupCache::new(30);
        let now = Utc::now();
        assert!(!cache.check_and_insert("abc", now));
        assert!(!cache.check_and_insert("abc", now + Duration::seconds(31)));
    }

    #[test]
    fn test_purge_removes_old_entries() {
        let cache = DedupCache::new(30);
        let now = Utc::now();
        cache.check_and_insert("old", now);
        cache.check_and_insert("fresh", now + Duration::seconds(59));
        cache.purge(now + Duration::seconds(61));
        assert_eq!(cache.len(), 1);
    }
}
