//! The event bridge.
//!
//! Adapts the engine's raw event stream into the normalized outbound stream
//! consumed by the server connection. Two long-lived tasks run per bridge:
//! the processor (pulls the subscription, normalizes, routes by priority)
//! and the drainer (moves overflowed high-priority events back into the
//! main channel as space frees up).

pub mod batcher;
pub mod event;
pub mod normalizer;
pub mod overflow;
pub mod stats;

use crate::bridge::batcher::{Batcher, FLUSH_TICK};
use crate::bridge::event::{types, AgentEvent};
use crate::bridge::normalizer::{Normalized, Normalizer};
use crate::bridge::overflow::OverflowBuffer;
use crate::bridge::stats::BridgeStats;
use crate::engine::{EngineQuery, EngineSubscription, EventType, RawEvent};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Bridge tuning knobs, loaded from the agent config file.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeTuning {
    /// Main outbound channel capacity.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Circular overflow buffer capacity.
    #[serde(default = "default_overflow_capacity")]
    pub overflow_capacity: usize,

    /// Max overflow entries moved back per drain tick.
    #[serde(default = "default_drain_max")]
    pub drain_max: usize,

    /// Drain tick interval in milliseconds.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// Bound on the in-flight start-time cache.
    #[serde(default = "default_start_cache_capacity")]
    pub start_cache_capacity: usize,
}

fn default_channel_capacity() -> usize {
    60_000
}
fn default_overflow_capacity() -> usize {
    10_000
}
fn default_drain_max() -> usize {
    50
}
fn default_drain_interval_ms() -> u64 {
    100
}
fn default_start_cache_capacity() -> usize {
    10_000
}

impl Default for BridgeTuning {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            overflow_capacity: default_overflow_capacity(),
            drain_max: default_drain_max(),
            drain_interval_ms: default_drain_interval_ms(),
            start_cache_capacity: default_start_cache_capacity(),
        }
    }
}

pub struct EventBridge {
    agent_id: String,
    subscriber_id: String,
    tuning: BridgeTuning,
    subscription: Arc<dyn EngineSubscription>,
    query: Arc<dyn EngineQuery>,
    tx: mpsc::Sender<AgentEvent>,
    overflow: Arc<OverflowBuffer>,
    batcher: Arc<Batcher>,
    stats: Arc<BridgeStats>,
    shutdown: CancellationToken,
}

impl EventBridge {
    /// Build a bridge and hand back the receiving half of the outbound
    /// channel.
    pub fn new(
        agent_id: String,
        tuning: BridgeTuning,
        subscription: Arc<dyn EngineSubscription>,
        query: Arc<dyn EngineQuery>,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(tuning.channel_capacity);
        let stats = Arc::new(BridgeStats::default());
        let bridge = Arc::new(Self {
            subscriber_id: format!("bridge-{}-{}", agent_id, uuid::Uuid::new_v4()),
            agent_id,
            overflow: Arc::new(OverflowBuffer::new(tuning.overflow_capacity)),
            batcher: Arc::new(Batcher::new(tx.clone(), stats.clone())),
            tuning,
            subscription,
            query,
            tx,
            stats,
            shutdown,
        });
        (bridge, rx)
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        self.stats.clone()
    }

    /// Run the bridge until shutdown. Spawns the drainer and the batch
    /// ticker, then drives the processor loop on this task.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let mut stream = self
            .subscription
            .subscribe(&self.subscriber_id)
            .await
            .map_err(|e| anyhow::anyhow!("engine subscription failed: {}", e))?;
        info!("event bridge subscribed as {}", self.subscriber_id);

        let drainer = {
            let bridge = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_millis(
                    bridge.tuning.drain_interval_ms,
                ));
                loop {
                    tokio::select! {
                        _ = bridge.shutdown.cancelled() => break,
                        _ = tick.tick() => bridge.drain_overflow(),
                    }
                }
            })
        };

        let batch_ticker = {
            let bridge = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(FLUSH_TICK);
                loop {
                    tokio::select! {
                        _ = bridge.shutdown.cancelled() => break,
                        _ = tick.tick() => bridge.batcher.tick().await,
                    }
                }
            })
        };

        let mut normalizer = Normalizer::new(
            self.agent_id.clone(),
            self.query.clone(),
            self.tuning.start_cache_capacity,
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("event bridge shutting down");
                    break;
                }
                maybe_raw = stream.recv() => {
                    match maybe_raw {
                        Some(raw) => self.handle_raw(&mut normalizer, raw).await,
                        None => {
                            warn!("engine event stream closed");
                            break;
                        }
                    }
                }
            }
        }

        self.subscription.unsubscribe(&self.subscriber_id).await;
        self.batcher.drain().await;

        // Whatever is still parked in the ring at shutdown is lost.
        let abandoned = self.overflow.len() as u64;
        if abandoned > 0 {
            BridgeStats::add(&self.stats.dropped_at_shutdown, abandoned);
            warn!("{} overflowed events dropped at shutdown", abandoned);
        }

        let _ = tokio::join!(drainer, batch_ticker);
        Ok(())
    }

    async fn handle_raw(&self, normalizer: &mut Normalizer, raw: RawEvent) {
        BridgeStats::incr(&self.stats.processed);
        let normalized = match raw.event_type {
            EventType::ItemStarted => normalizer.normalize(&raw),
            EventType::ItemFinished => normalizer.finalize(&raw).await,
            EventType::DownloadProgress => normalizer.progress(&raw),
            _ => match map_passthrough(&raw) {
                Some(event) => Normalized::One(event),
                None => Normalized::Dropped,
            },
        };

        match normalized {
            Normalized::One(event) => self.dispatch(event).await,
            Normalized::Many(events) => {
                for event in events {
                    self.dispatch(event).await;
                }
            }
            Normalized::Dropped => BridgeStats::incr(&self.stats.dropped_invalid),
        }
    }

    /// Route one outbound event. High-priority events go channel-first with
    /// the ring as fallback; everything else is batched.
    async fn dispatch(&self, event: AgentEvent) {
        if event.is_high_priority() {
            match self.tx.try_send(event) {
                Ok(()) => BridgeStats::incr(&self.stats.delivered),
                Err(mpsc::error::TrySendError::Full(event)) => {
                    BridgeStats::incr(&self.stats.overflowed);
                    if self.overflow.push(event) {
                        BridgeStats::incr(&self.stats.overflow_overwritten);
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        } else {
            self.batcher.push(event).await;
        }
    }

    /// One drain tick: move up to `drain_max` ring entries back into the
    /// main channel, stopping the tick on the first refused send.
    fn drain_overflow(&self) {
        for _ in 0..self.tuning.drain_max {
            let Some(event) = self.overflow.pop() else {
                break;
            };
            match self.tx.try_send(event) {
                Ok(()) => BridgeStats::incr(&self.stats.delivered),
                Err(mpsc::error::TrySendError::Full(event)) => {
                    self.overflow.push_front(event);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    }
}

/// Map a non-transfer raw event onto its outbound type, payload passed
/// through untouched.
fn map_passthrough(raw: &RawEvent) -> Option<AgentEvent> {
    let event_type = match raw.event_type {
        EventType::FolderSummary => types::SYNC_STATUS,
        EventType::FolderCompletion => {
            let done = raw
                .data
                .get("completion")
                .and_then(|c| c.as_f64())
                .map(|c| c >= 100.0)
                .unwrap_or(false);
            if done {
                types::FOLDER_SYNC_COMPLETED
            } else {
                types::SYNC_STATUS
            }
        }
        EventType::FolderErrors => types::SYNC_ERROR,
        EventType::DeviceConnected => types::DEVICE_CONNECTED,
        EventType::DeviceDisconnected => types::DEVICE_DISCONNECTED,
        EventType::StateChanged => {
            let from = raw.data.get("from").and_then(|v| v.as_str());
            let to = raw.data.get("to").and_then(|v| v.as_str());
            if from == Some("syncing") && to == Some("idle") {
                types::SYNC_COMPLETED
            } else {
                types::STATE_CHANGED
            }
        }
        EventType::FolderScanProgress => types::FOLDER_SCAN_PROGRESS,
        EventType::LocalChange => types::LOCAL_CHANGE_DETECTED,
        EventType::RemoteChange => types::REMOTE_CHANGE_DETECTED,
        EventType::LocalIndexUpdated => types::LOCAL_INDEX_UPDATED,
        EventType::RemoteIndexUpdated => types::REMOTE_INDEX_UPDATED,
        EventType::FolderRejected => types::FOLDER_REJECTED,
        EventType::ConfigSaved => types::CONFIG_SAVED,
        EventType::RemoteDownloadProgress => types::REMOTE_DOWNLOAD_PROGRESS,
        // Transfer events never reach the passthrough.
        EventType::ItemStarted | EventType::ItemFinished | EventType::DownloadProgress => {
            return None;
        }
    };
    Some(AgentEvent::new(event_type, raw.time, raw.data.clone()))
}
