//! Process-wide ingest counters.
//!
//! Encapsulated behind atomic increments; never read as a mutable
//! singleton. Exported through `GET /api/stats`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IngestMetrics {
    pub processed: AtomicU64,
    pub deduplicated: AtomicU64,
    pub conflicts: AtomicU64,
    pub version_lost: AtomicU64,
    pub dropped: AtomicU64,
    pub summarized: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub processed_events: u64,
    pub deduplicated_events: u64,
    pub conflict_events: u64,
    pub version_lost_events: u64,
    pub dropped_events: u64,
    pub summarized_events: u64,
    pub active_transfers: usize,
    pub cached_events: usize,
    pub deduplication_rate: f64,
    pub conflict_rate: f64,
}

impl IngestMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_transfers: usize, cached_events: usize) -> MetricsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let deduplicated = self.deduplicated.load(Ordering::Relaxed);
        let conflicts = self.conflicts.load(Ordering::Relaxed);
        let rate = |n: u64| {
            if processed > 0 {
                n as f64 / processed as f64
            } else {
                0.0
            }
        };
        MetricsSnapshot {
            processed_events: processed,
            deduplicated_events: deduplicated,
            conflict_events: conflicts,
            version_lost_events: self.version_lost.load(Ordering::Relaxed),
            dropped_events: self.dropped.load(Ordering::Relaxed),
            summarized_events: self.summarized.load(Ordering::Relaxed),
            active_transfers,
            cached_events,
            deduplication_rate: rate(deduplicated),
            conflict_rate: rate(conflicts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates() {
        let metrics = IngestMetrics::default();
        IngestMetrics::add(&metrics.processed, 10);
        IngestMetrics::add(&metrics.deduplicated, 2);
        IngestMetrics::incr(&metrics.conflicts);

        let snap = metrics.snapshot(3, 7);
        assert_eq!(snap.processed_events, 10);
        assert!((snap.deduplication_rate - 0.2).abs() < f64::EPSILON);
        assert!((snap.conflict_rate - 0.1).abs() < f64::EPSILON);
        assert_eq!(snap.active_transfers, 3);
        assert_eq!(snap.cached_events, 7);
    }

    #[test]
    fn test_zero_processed_has_zero_rates() {
        let snap = IngestMetrics::default().snapshot(0, 0);
        assert_eq!(snap.deduplication_rate, 0.0);
        assert_eq!(snap.conflict_rate, 0.0);
    }
}
