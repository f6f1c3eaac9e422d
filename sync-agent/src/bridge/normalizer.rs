//! Normalizes raw engine events into typed transfer events.
//!
//! The engine's item lifecycle arrives as `ItemStarted` / `DownloadProgress`
//! / `ItemFinished` with loosely-typed payloads. The normalizer extracts the
//! typed fields, computes start-to-finish durations from a bounded
//! start-time cache, and resolves missing file sizes through the engine's
//! file-info query.

use crate::bridge::event::{types, AgentEvent, TransferEventData};
use crate::engine::payload::PayloadView;
use crate::engine::{EngineQuery, RawEvent};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Start-cache entries older than this are evicted to bound memory.
const START_CACHE_TTL_SECS: i64 = 3600;

/// Result of normalizing one raw event.
#[derive(Debug)]
pub enum Normalized {
    One(AgentEvent),
    Many(Vec<AgentEvent>),
    /// Required fields were missing; the event is dead-lettered.
    Dropped,
}

struct StartEntry {
    started_at: DateTime<Utc>,
    action: String,
}

pub struct Normalizer {
    agent_id: String,
    engine: Arc<dyn EngineQuery>,
    /// `(job_id, file_name)` -> start time and action of the in-flight item.
    start_cache: HashMap<(String, String), StartEntry>,
    start_cache_capacity: usize,
}

impl Normalizer {
    pub fn new(agent_id: String, engine: Arc<dyn EngineQuery>, start_cache_capacity: usize) -> Self {
        Self {
            agent_id,
            engine,
            start_cache: HashMap::new(),
            start_cache_capacity,
        }
    }

    /// Normalize an `ItemStarted` event and record its start time.
    pub fn normalize(&mut self, raw: &RawEvent) -> Normalized {
        let view = PayloadView::new(&raw.data);
        let Some(job_id) = view.str_at(&["folder"]).filter(|s| !s.is_empty()) else {
            return Normalized::Dropped;
        };
        let Some(file_name) = view.str_at(&["item"]).filter(|s| !s.is_empty()) else {
            return Normalized::Dropped;
        };
        let action = view.str_at(&["action"]).unwrap_or("update").to_string();

        self.evict_stale_starts(raw.time);
        self.start_cache.insert(
            (job_id.to_string(), file_name.to_string()),
            StartEntry {
                started_at: raw.time,
                action: action.clone(),
            },
        );

        let data = TransferEventData {
            job_id: job_id.to_string(),
            session_id: None,
            agent_id: self.agent_id.clone(),
            file_name: file_name.to_string(),
            file_path: view.str_at(&["path"]).map(str::to_string),
            file_size: view.int_at(&["size"]).map(|s| s.max(0) as u64).unwrap_or(0),
            delta_bytes_transferred: 0,
            delta_bytes_completed: 0,
            action,
            status: "started".to_string(),
            progress: 0.0,
            transfer_rate: 0.0,
            duration: 0.0,
            compression_ratio: None,
            error: None,
        };
        Normalized::One(data.into_event(types::FILE_TRANSFER_STARTED, raw.time))
    }

    /// Normalize an `ItemFinished` event, computing its duration and
    /// resolving a missing size through the engine.
    pub async fn finalize(&mut self, raw: &RawEvent) -> Normalized {
        let view = PayloadView::new(&raw.data);
        let Some(job_id) = view.str_at(&["folder"]).filter(|s| !s.is_empty()) else {
            return Normalized::Dropped;
        };
        let Some(file_name) = view.str_at(&["item"]).filter(|s| !s.is_empty()) else {
            return Normalized::Dropped;
        };

        let key = (job_id.to_string(), file_name.to_string());
        let start = self.start_cache.remove(&key);
        let duration = match &start {
            Some(entry) => {
                let secs = (raw.time - entry.started_at).num_milliseconds() as f64 / 1000.0;
                secs.max(0.0)
            }
            None => {
                debug!(
                    "no recorded start for {}/{}, reporting zero duration",
                    job_id, file_name
                );
                0.0
            }
        };

        let action = view
            .str_at(&["action"])
            .map(str::to_string)
            .or_else(|| start.map(|entry| entry.action))
            .unwrap_or_else(|| "update".to_string());

        let error = view
            .str_at(&["error"])
            .filter(|e| !e.is_empty())
            .map(str::to_string);

        let mut file_size = view
            .int_at(&["size"])
            .or_else(|| view.int_at(&["fileSize"]))
            .map(|s| s.max(0) as u64)
            .unwrap_or(0);

        // Deletions legitimately carry no size; for everything else ask the
        // engine. Lookup failure is tolerated and the size stays zero.
        if file_size == 0 && action != "delete" {
            match self.engine.file_info(job_id, file_name).await {
                Ok(size) => file_size = size,
                Err(e) => warn!("file info lookup failed for {}/{}: {}", job_id, file_name, e),
            }
        }

        let transfer_rate = if duration > 0.0 {
            file_size as f64 / duration
        } else {
            0.0
        };

        let status = if error.is_some() { "failed" } else { "completed" };
        let data = TransferEventData {
            job_id: job_id.to_string(),
            session_id: None,
            agent_id: self.agent_id.clone(),
            file_name: file_name.to_string(),
            file_path: view.str_at(&["path"]).map(str::to_string),
            file_size,
            delta_bytes_transferred: file_size,
            delta_bytes_completed: file_size,
            action,
            status: status.to_string(),
            progress: 100.0,
            transfer_rate,
            duration,
            compression_ratio: None,
            error,
        };
        Normalized::One(data.into_event(types::FILE_TRANSFER_COMPLETED, raw.time))
    }

    /// Normalize a `DownloadProgress` event.
    ///
    /// The payload is a nested mapping `folder -> file -> {BytesTotal,
    /// BytesDone}`; one event is emitted per file.
    pub fn progress(&mut self, raw: &RawEvent) -> Normalized {
        let view = PayloadView::new(&raw.data);
        let mut events = Vec::new();

        for (job_id, folder_view) in view.entries(&[]) {
            for (file_name, file_view) in folder_view.entries(&[]) {
                let total = file_view
                    .int_at(&["BytesTotal"])
                    .map(|v| v.max(0) as u64)
                    .unwrap_or(0);
                let done = file_view
                    .int_at(&["BytesDone"])
                    .map(|v| v.max(0) as u64)
                    .unwrap_or(0)
                    .min(total);
                let progress = if total > 0 {
                    100.0 * done as f64 / total as f64
                } else {
                    0.0
                };

                let data = TransferEventData {
                    job_id: job_id.to_string(),
                    session_id: None,
                    agent_id: self.agent_id.clone(),
                    file_name: file_name.to_string(),
                    file_path: None,
                    file_size: total,
                    delta_bytes_transferred: done,
                    delta_bytes_completed: done,
                    action: "update".to_string(),
                    status: "in_progress".to_string(),
                    progress,
                    transfer_rate: 0.0,
                    duration: 0.0,
                    compression_ratio: None,
                    error: None,
                };
                events.push(data.into_event(types::FILE_TRANSFER_PROGRESS, raw.time));
            }
        }

        if events.is_empty() {
            Normalized::Dropped
        } else {
            Normalized::Many(events)
        }
    }

    /// Drop start-cache entries past the TTL; when the cache is over
    /// capacity the oldest entries go too.
    fn evict_stale_starts(&mut self, now: DateTime<Utc>) {
        self.start_cache
            .retain(|_, entry| (now - entry.started_at).num_seconds() < START_CACHE_TTL_SECS);

        if self.start_cache.len() >= self.start_cache_capacity {
            let mut by_age: Vec<_> = self
                .start_cache
                .iter()
                .map(|(k, entry)| (k.clone(), entry.started_at))
                .collect();
            by_age.sort_by_key(|(_, started_at)| *started_at);
            let excess = self.start_cache.len() + 1 - self.start_cache_capacity;
            for (key, _) in by_age.into_iter().take(excess) {
                self.start_cache.remove(&key);
            }
        }
    }

    #[cfg(test)]
    fn start_cache_len(&self) -> usize {
        self.start_cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, EventType};
    use chrono::Duration as ChronoDuration;
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use serde_json::json;

    struct StubQuery {
        size: Option<u64>,
    }

    impl EngineQuery for StubQuery {
        fn file_info<'a>(
            &'a self,
            _folder: &'a str,
            _item: &'a str,
        ) -> BoxFuture<'a, Result<u64, EngineError>> {
            async move {
                self.size
                    .ok_or_else(|| EngineError::Transient("unavailable".into()))
            }
            .boxed()
        }
    }

    fn normalizer(size: Option<u64>) -> Normalizer {
        Normalizer::new("agent-1".into(), Arc::new(StubQuery { size }), 1000)
    }

    fn raw(event_type: EventType, time: DateTime<Utc>, data: serde_json::Value) -> RawEvent {
        RawEvent {
            id: 1,
            event_type,
            time,
            data,
        }
    }

    fn transfer_data(event: &AgentEvent) -> TransferEventData {
        serde_json::from_value(event.data.clone()).unwrap()
    }

    #[test]
    fn test_normalize_item_started() {
        let mut n = normalizer(None);
        let time = Utc::now();
        let result = n.normalize(&raw(
            EventType::ItemStarted,
            time,
            json!({"folder": "docs", "item": "a.txt", "action": "update"}),
        ));
        let Normalized::One(event) = result else {
            panic!("expected one event");
        };
        assert_eq!(event.event_type, types::FILE_TRANSFER_STARTED);
        let data = transfer_data(&event);
        assert_eq!(data.job_id, "docs");
        assert_eq!(data.file_name, "a.txt");
        assert_eq!(data.status, "started");
        assert_eq!(data.progress, 0.0);
        assert_eq!(n.start_cache_len(), 1);
    }

    #[test]
    fn test_normalize_missing_fields_dropped() {
        let mut n = normalizer(None);
        let time = Utc::now();
        assert!(matches!(
            n.normalize(&raw(EventType::ItemStarted, time, json!({"item": "a.txt"}))),
            Normalized::Dropped
        ));
        assert!(matches!(
            n.normalize(&raw(EventType::ItemStarted, time, json!({"folder": "docs"}))),
            Normalized::Dropped
        ));
        assert_eq!(n.start_cache_len(), 0);
    }

    #[tokio::test]
    async fn test_finalize_computes_duration() {
        let mut n = normalizer(None);
        let start = Utc::now();
        n.normalize(&raw(
            EventType::ItemStarted,
            start,
            json!({"folder": "docs", "item": "a.txt", "action": "update"}),
        ));

        let finish = start + ChronoDuration::seconds(2);
        let result = n
            .finalize(&raw(
                EventType::ItemFinished,
                finish,
                json!({"folder": "docs", "item": "a.txt", "size": 1000}),
            ))
            .await;
        let Normalized::One(event) = result else {
            panic!("expected one event");
        };
        let data = transfer_data(&event);
        assert_eq!(data.status, "completed");
        assert!((data.duration - 2.0).abs() < f64::EPSILON);
        assert_eq!(data.file_size, 1000);
        assert!((data.transfer_rate - 500.0).abs() < f64::EPSILON);
        assert_eq!(data.progress, 100.0);
        // Finishing consumes the start entry.
        assert_eq!(n.start_cache_len(), 0);
    }

    #[tokio::test]
    async fn test_finalize_without_start_has_zero_duration() {
        let mut n = normalizer(None);
        let result = n
            .finalize(&raw(
                EventType::ItemFinished,
                Utc::now(),
                json!({"folder": "docs", "item": "a.txt", "size": 10}),
            ))
            .await;
        let Normalized::One(event) = result else {
            panic!("expected one event");
        };
        assert_eq!(transfer_data(&event).duration, 0.0);
    }

    #[tokio::test]
    async fn test_finalize_resolves_missing_size() {
        let mut n = normalizer(Some(4096));
        let result = n
            .finalize(&raw(
                EventType::ItemFinished,
                Utc::now(),
                json!({"folder": "docs", "item": "a.txt"}),
            ))
            .await;
        let Normalized::One(event) = result else {
            panic!("expected one event");
        };
        assert_eq!(transfer_data(&event).file_size, 4096);
    }

    #[tokio::test]
    async fn test_finalize_tolerates_lookup_failure() {
        let mut n = normalizer(None);
        let result = n
            .finalize(&raw(
                EventType::ItemFinished,
                Utc::now(),
                json!({"folder": "docs", "item": "a.txt"}),
            ))
            .await;
        let Normalized::One(event) = result else {
            panic!("expected one event");
        };
        assert_eq!(transfer_data(&event).file_size, 0);
    }

    #[tokio::test]
    async fn test_finalize_delete_skips_lookup() {
        // Stub would return a size; a delete must not ask for one.
        let mut n = normalizer(Some(4096));
        let result = n
            .finalize(&raw(
                EventType::ItemFinished,
                Utc::now(),
                json!({"folder": "docs", "item": "a.txt", "action": "delete"}),
            ))
            .await;
        let Normalized::One(event) = result else {
            panic!("expected one event");
        };
        let data = transfer_data(&event);
        assert_eq!(data.file_size, 0);
        assert_eq!(data.action, "delete");
    }

    #[tokio::test]
    async fn test_finalize_with_error_is_failed() {
        let mut n = normalizer(None);
        let result = n
            .finalize(&raw(
                EventType::ItemFinished,
                Utc::now(),
                json!({"folder": "docs", "item": "a.txt", "size": 5, "error": "disk full"}),
            ))
            .await;
        let Normalized::One(event) = result else {
            panic!("expected one event");
        };
        let data = transfer_data(&event);
        assert_eq!(data.status, "failed");
        assert_eq!(data.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_progress_emits_one_event_per_file() {
        let mut n = normalizer(None);
        let result = n.progress(&raw(
            EventType::DownloadProgress,
            Utc::now(),
            json!({
                "docs": {
                    "a.txt": {"BytesTotal": 1000, "BytesDone": 500},
                    "b.txt": {"BytesTotal": 200, "BytesDone": 200}
                }
            }),
        ));
        let Normalized::Many(events) = result else {
            panic!("expected many events");
        };
        assert_eq!(events.len(), 2);

        let mut by_file: Vec<_> = events.iter().map(transfer_data).collect();
        by_file.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        assert!((by_file[0].progress - 50.0).abs() < f64::EPSILON);
        assert!((by_file[1].progress - 100.0).abs() < f64::EPSILON);
        assert_eq!(by_file[0].status, "in_progress");
    }

    #[test]
    fn test_progress_clamps_inverted_counts() {
        let mut n = normalizer(None);
        let result = n.progress(&raw(
            EventType::DownloadProgress,
            Utc::now(),
            json!({"docs": {"a.txt": {"BytesTotal": 100, "BytesDone": 250}}}),
        ));
        let Normalized::Many(events) = result else {
            panic!("expected many events");
        };
        let data = transfer_data(&events[0]);
        assert_eq!(data.delta_bytes_transferred, 100);
        assert_eq!(data.progress, 100.0);
    }

    #[test]
    fn test_progress_negative_counts_clamped_to_zero() {
        let mut n = normalizer(None);
        let result = n.progress(&raw(
            EventType::DownloadProgress,
            Utc::now(),
            json!({"docs": {"a.txt": {"BytesTotal": 100, "BytesDone": -5}}}),
        ));
        let Normalized::Many(events) = result else {
            panic!("expected many events");
        };
        let data = transfer_data(&events[0]);
        assert_eq!(data.delta_bytes_transferred, 0);
        assert_eq!(data.progress, 0.0);
    }

    #[test]
    fn test_progress_empty_payload_dropped() {
        let mut n = normalizer(None);
        assert!(matches!(
            n.progress(&raw(EventType::DownloadProgress, Utc::now(), json!({}))),
            Normalized::Dropped
        ));
    }

    #[test]
    fn test_start_cache_ttl_eviction() {
        let mut n = normalizer(None);
        let old = Utc::now() - ChronoDuration::hours(2);
        n.normalize(&raw(
            EventType::ItemStarted,
            old,
            json!({"folder": "docs", "item": "stale.txt"}),
        ));
        assert_eq!(n.start_cache_len(), 1);

        n.normalize(&raw(
            EventType::ItemStarted,
            Utc::now(),
            json!({"folder": "docs", "item": "fresh.txt"}),
        ));
        // The stale entry was evicted on insert.
        assert_eq!(n.start_cache_len(), 1);
    }

    #[test]
    fn test_start_cache_capacity_bound() {
        let mut n = Normalizer::new("agent-1".into(), Arc::new(StubQuery { size: None }), 3);
        let base = Utc::now();
        for i in 0..5 {
            n.normalize(&raw(
                EventType::ItemStarted,
                base + ChronoDuration::seconds(i),
                json!({"folder": "docs", "item": format!("f{}.txt", i)}),
            ));
        }
        assert!(n.start_cache_len() <= 3);
    }
}
