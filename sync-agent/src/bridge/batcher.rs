//! Adaptive batching of low-priority events toward the main channel.
//!
//! Batch size and flush interval scale with main-channel load. A flush
//! delivers events individually; when the channel fills mid-flush, the
//! remaining tail collapses into a single `file_operations_summary` event
//! so the consumer can still account for every input. A 50 ms ticker polls
//! the thresholds instead of rescheduling a shared timer.

use crate::bridge::event::{types, AgentEvent};
use crate::bridge::stats::BridgeStats;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// How long a summary send may block before the summary itself is dropped.
const SUMMARY_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll granularity for interval-based flushes.
pub const FLUSH_TICK: Duration = Duration::from_millis(50);

pub struct Batcher {
    tx: mpsc::Sender<AgentEvent>,
    buf: Mutex<BatchBuf>,
    stats: Arc<BridgeStats>,
}

struct BatchBuf {
    events: Vec<AgentEvent>,
    last_flush: Instant,
}

/// Outcome of a single flush, for accounting.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub delivered: usize,
    pub summarized: usize,
    pub dropped: usize,
    pub summary_timed_out: bool,
}

impl Batcher {
    pub fn new(tx: mpsc::Sender<AgentEvent>, stats: Arc<BridgeStats>) -> Self {
        Self {
            tx,
            buf: Mutex::new(BatchBuf {
                events: Vec::new(),
                last_flush: Instant::now(),
            }),
            stats,
        }
    }

    /// Current thresholds from main-channel load.
    fn thresholds(&self) -> (usize, Duration) {
        let max = self.tx.max_capacity();
        let load = 1.0 - (self.tx.capacity() as f64 / max as f64);
        if load > 0.8 {
            (1000, Duration::from_millis(50))
        } else if load >= 0.5 {
            (500, Duration::from_millis(200))
        } else {
            (100, Duration::from_millis(1000))
        }
    }

    /// Queue a low-priority event; flushes when the size threshold is hit.
    pub async fn push(&self, event: AgentEvent) {
        BridgeStats::incr(&self.stats.batched);
        let (batch_size, _) = self.thresholds();
        let batch = {
            let mut buf = self.buf.lock().await;
            buf.events.push(event);
            if buf.events.len() >= batch_size {
                buf.last_flush = Instant::now();
                std::mem::take(&mut buf.events)
            } else {
                return;
            }
        };
        self.flush_batch(batch).await;
    }

    /// Interval poll; flushes when the elapsed threshold is exceeded.
    pub async fn tick(&self) {
        let (_, interval) = self.thresholds();
        let batch = {
            let mut buf = self.buf.lock().await;
            if buf.events.is_empty() || buf.last_flush.elapsed() < interval {
                return;
            }
            buf.last_flush = Instant::now();
            std::mem::take(&mut buf.events)
        };
        self.flush_batch(batch).await;
    }

    /// Flush any buffered events regardless of thresholds.
    pub async fn drain(&self) {
        let batch = {
            let mut buf = self.buf.lock().await;
            buf.last_flush = Instant::now();
            std::mem::take(&mut buf.events)
        };
        if !batch.is_empty() {
            self.flush_batch(batch).await;
        }
    }

    async fn flush_batch(&self, batch: Vec<AgentEvent>) {
        let outcome = flush(&self.tx, batch).await;
        BridgeStats::add(&self.stats.delivered, outcome.delivered as u64);
        BridgeStats::add(&self.stats.summarized, outcome.summarized as u64);
        BridgeStats::add(&self.stats.dropped_summary_events, outcome.dropped as u64);
        if outcome.summary_timed_out {
            BridgeStats::incr(&self.stats.summary_timeouts);
            warn!(
                "summary send timed out, {} events dropped",
                outcome.dropped
            );
        }
    }
}

/// Deliver a batch: each event individually, then one summary for whatever
/// the channel refused. Either every event is delivered, or the tail is
/// accounted for by exactly one summary carrying its count and histogram.
async fn flush(tx: &mpsc::Sender<AgentEvent>, batch: Vec<AgentEvent>) -> FlushOutcome {
    let mut outcome = FlushOutcome::default();
    if batch.is_empty() {
        return outcome;
    }

    let total = batch.len();
    let mut tail: Vec<AgentEvent> = Vec::new();
    let mut events = batch.into_iter();

    for event in events.by_ref() {
        match tx.try_send(event) {
            Ok(()) => outcome.delivered += 1,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tail.push(event);
                break;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Receiver gone; nothing downstream to account to.
                outcome.dropped = total - outcome.delivered;
                return outcome;
            }
        }
    }
    tail.extend(events);

    if tail.is_empty() {
        return outcome;
    }

    let summary = summarize(&tail);
    let tail_count = tail.len();
    debug!("channel saturated mid-flush, summarizing {} events", tail_count);

    match tokio::time::timeout(SUMMARY_SEND_TIMEOUT, tx.send(summary)).await {
        Ok(Ok(())) => outcome.summarized = tail_count,
        Ok(Err(_)) => outcome.dropped = tail_count,
        Err(_) => {
            outcome.summary_timed_out = true;
            outcome.dropped = tail_count;
        }
    }
    outcome
}

/// Collapse a tail of undeliverable events into one summary event.
fn summarize(tail: &[AgentEvent]) -> AgentEvent {
    let mut breakdown: HashMap<&str, u64> = HashMap::new();
    for event in tail {
        *breakdown.entry(event.event_type.as_str()).or_insert(0) += 1;
    }
    AgentEvent::new(
        types::FILE_OPERATIONS_SUMMARY,
        Utc::now(),
        json!({
            "dropped_count": tail.len(),
            "event_breakdown": breakdown,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: &str, n: usize) -> AgentEvent {
        AgentEvent::new(event_type, Utc::now(), json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_flush_all_delivered() {
        let (tx, mut rx) = mpsc::channel(16);
        let batch: Vec<_> = (0..5).map(|n| event(types::STATE_CHANGED, n)).collect();
        let outcome = flush(&tx, batch).await;
        assert_eq!(outcome.delivered, 5);
        assert_eq!(outcome.summarized, 0);
        assert_eq!(outcome.dropped, 0);
        for _ in 0..5 {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[tokio::test]
    async fn test_flush_tail_summarized() {
        let (tx, mut rx) = mpsc::channel(3);
        let batch: Vec<_> = (0..10).map(|n| event(types::FILE_TRANSFER_PROGRESS, n)).collect();

        // Fill happens inside flush: 3 delivered, then the summary cannot
        // be sent until we read. Read concurrently.
        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(ev) = rx.recv().await {
                received.push(ev);
                if received.len() == 4 {
                    break;
                }
            }
            received
        });

        let outcome = flush(&tx, batch).await;
        let received = reader.await.unwrap();

        assert_eq!(outcome.delivered, 3);
        assert_eq!(outcome.summarized, 7);
        assert_eq!(outcome.dropped, 0);
        assert_eq!(outcome.delivered + outcome.summarized + outcome.dropped, 10);

        let summary = received.last().unwrap();
        assert_eq!(summary.event_type, types::FILE_OPERATIONS_SUMMARY);
        assert_eq!(summary.data["dropped_count"], 7);
        assert_eq!(
            summary.data["event_breakdown"][types::FILE_TRANSFER_PROGRESS],
            7
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_send_times_out() {
        let (tx, _rx) = mpsc::channel(1);
        // Saturate the channel so both the tail collapse and the summary
        // send block; with no reader the 5 s ceiling must fire.
        tx.try_send(event(types::STATE_CHANGED, 0)).unwrap();

        let batch: Vec<_> = (0..4).map(|n| event(types::STATE_CHANGED, n)).collect();
        let outcome = flush(&tx, batch).await;

        assert!(outcome.summary_timed_out);
        assert_eq!(outcome.delivered, 0);
        assert_eq!(outcome.dropped, 4);
        assert_eq!(outcome.delivered + outcome.summarized + outcome.dropped, 4);
    }

    #[tokio::test]
    async fn test_push_flushes_at_batch_size() {
        let (tx, mut rx) = mpsc::channel(256);
        let stats = Arc::new(BridgeStats::default());
        let batcher = Batcher::new(tx, stats.clone());

        // Low load: size threshold is 100.
        for n in 0..99 {
            batcher.push(event(types::STATE_CHANGED, n)).await;
        }
        assert!(rx.try_recv().is_err());

        batcher.push(event(types::STATE_CHANGED, 99)).await;
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 100);
    }

    #[tokio::test]
    async fn test_tick_flushes_after_interval() {
        let (tx, mut rx) = mpsc::channel(256);
        let stats = Arc::new(BridgeStats::default());
        let batcher = Batcher::new(tx, stats);

        batcher.push(event(types::STATE_CHANGED, 0)).await;
        batcher.tick().await;
        // Interval not elapsed yet at low load (1000 ms).
        assert!(rx.try_recv().is_err());

        {
            let mut buf = batcher.buf.lock().await;
            buf.last_flush = Instant::now() - Duration::from_millis(1500);
        }
        batcher.tick().await;
        assert!(rx.try_recv().is_ok());
    }
}
