//! Coordinated shutdown for the agent's long-lived tasks.
//!
//! The bridge processor, the overflow drainer, the batch ticker, and the
//! server connection all watch one cancellation token. After the token
//! fires, cancelled tasks get a settle window sized from the bridge's own
//! cadence so the outbound tail reaches the server connection before the
//! tasks are reaped.

use crate::bridge::batcher::FLUSH_TICK;
use crate::bridge::BridgeTuning;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    settle_window: Duration,
}

impl ShutdownCoordinator {
    /// The settle window covers one overflow drain tick plus two batch
    /// flush ticks: enough for the drainer's final pass and the closing
    /// flush to land on the outbound channel.
    pub fn new(tuning: &BridgeTuning) -> Self {
        Self {
            cancel: CancellationToken::new(),
            settle_window: Duration::from_millis(tuning.drain_interval_ms) + FLUSH_TICK * 2,
        }
    }

    /// The token shared with every task this coordinator stops.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Block until SIGINT or SIGTERM, then cancel all tasks.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down"),
            _ = terminate => info!("Received SIGTERM, shutting down"),
        }

        self.cancel.cancel();
    }

    /// Let cancelled tasks drain before their handles are awaited.
    pub async fn settle(&self) {
        tokio::time::sleep(self.settle_window).await;
    }
}
