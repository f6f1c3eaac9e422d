//! Periodic cache cleanup.
//!
//! Ages out dedup hashes past twice the window and idle in-memory transfer
//! and session state. Persistent rows are never touched.

use crate::state::AppState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn start_cleanup_worker(state: Arc<AppState>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            state.config.cleanup_interval_secs,
        ));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let (transfers, sessions) = state.manager.evict_expired(chrono::Utc::now());
                    if transfers > 0 || sessions > 0 {
                        tracing::info!(
                            "cleanup: evicted {} transfers, {} sessions",
                            transfers,
                            sessions
                        );
                    }
                }
            }
        }
        tracing::info!("Cleanup worker stopped");
    });
}
