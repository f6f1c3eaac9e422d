//! Process-wide bridge counters.
//!
//! Shared between the processor, the batcher, the drain task, and the local
//! stats endpoint; all increments are atomic and reads never block.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BridgeStats {
    pub processed: AtomicU64,
    pub dropped_invalid: AtomicU64,
    pub overflowed: AtomicU64,
    pub overflow_overwritten: AtomicU64,
    pub batched: AtomicU64,
    pub delivered: AtomicU64,
    pub summarized: AtomicU64,
    pub summary_timeouts: AtomicU64,
    pub dropped_summary_events: AtomicU64,
    pub dropped_at_shutdown: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatsSnapshot {
    pub processed: u64,
    pub dropped_invalid: u64,
    pub overflowed: u64,
    pub overflow_overwritten: u64,
    pub batched: u64,
    pub delivered: u64,
    pub summarized: u64,
    pub summary_timeouts: u64,
    pub dropped_summary_events: u64,
    pub dropped_at_shutdown: u64,
}

impl BridgeStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            dropped_invalid: self.dropped_invalid.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            overflow_overwritten: self.overflow_overwritten.load(Ordering::Relaxed),
            batched: self.batched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            summarized: self.summarized.load(Ordering::Relaxed),
            summary_timeouts: self.summary_timeouts.load(Ordering::Relaxed),
            dropped_summary_events: self.dropped_summary_events.load(Ordering::Relaxed),
            dropped_at_shutdown: self.dropped_at_shutdown.load(Ordering::Relaxed),
        }
    }
}
