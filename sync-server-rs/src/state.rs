use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::ingest::reconciler::SyncStateManager;
use crate::ws::agent_registry::AgentRegistry;
use crate::ws::ui::UiBroadcaster;
use std::sync::Arc;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub ui: UiBroadcaster,
    pub agents: Arc<AgentRegistry>,
    pub manager: Arc<SyncStateManager>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let manager = Arc::new(SyncStateManager::new(
            db.clone(),
            config.dedup_window_secs,
            config.state_timeout_secs,
        ));
        Self {
            db,
            config,
            ui: UiBroadcaster::new(),
            agents: Arc::new(AgentRegistry::new()),
            manager,
        }
    }
}
