//! Agent WebSocket endpoint — the server side of the event transport.
//!
//! Each agent keeps one connection here. After the registration handshake,
//! every text frame is an `AgentEvent`; transfer events are routed into the
//! reconciler, summaries are counted opaquely, and everything interesting
//! is re-broadcast to dashboard clients.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::ingest::event::NormalizedTransferEvent;
use crate::ingest::reconciler::Applied;
use crate::ingest::IngestError;
use crate::models::agent;
use crate::state::AppState;

#[derive(Debug)]
pub struct AgentConnection {
    pub agent_id: String,
    pub hostname: String,
    pub version: String,
    pub tx: mpsc::UnboundedSender<String>,
}

pub struct AgentRegistry {
    agents: DashMap<String, AgentConnection>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    pub fn register(
        &self,
        agent_id: String,
        hostname: String,
        version: String,
        tx: mpsc::UnboundedSender<String>,
    ) {
        // Close old connection if exists
        if let Some((_, old)) = self.agents.remove(&agent_id) {
            drop(old);
        }
        self.agents.insert(
            agent_id.clone(),
            AgentConnection {
                agent_id,
                hostname,
                version,
                tx,
            },
        );
    }

    pub fn unregister(&self, agent_id: &str) {
        self.agents.remove(agent_id);
    }

    pub fn connected_agents(&self) -> Vec<(String, String, String)> {
        self.agents
            .iter()
            .map(|entry| {
                let conn = entry.value();
                (
                    conn.agent_id.clone(),
                    conn.hostname.clone(),
                    conn.version.clone(),
                )
            })
            .collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, state))
}

async fn handle_agent_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let mut agent_id: Option<String> = None;

    // Forward outgoing messages to the agent
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
            _ => continue,
        };

        let parsed: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let Some(msg_type) = parsed.get("type").and_then(|t| t.as_str()) else {
            continue;
        };

        if msg_type == "agent:register" {
            agent_id = handle_register(&parsed, &state, &tx).await;
            continue;
        }

        let Some(agent_id) = agent_id.as_deref() else {
            // Events before registration carry no trusted identity.
            tracing::warn!("event {} from unregistered connection dropped", msg_type);
            continue;
        };

        handle_agent_event(msg_type, &parsed, agent_id, &state).await;
    }

    // Cleanup on disconnect
    if let Some(aid) = &agent_id {
        tracing::info!("Agent disconnected: agent_id={}", aid);
        state.agents.unregister(aid);

        let db = state.db.clone();
        let aid2 = aid.clone();
        let _ = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            agent::mark_disconnected(&conn, &aid2)
        })
        .await;

        state
            .ui
            .broadcast("agent:disconnected", serde_json::json!({ "agentId": aid }));
    }

    send_task.abort();
}

async fn handle_register(
    parsed: &Value,
    state: &Arc<AppState>,
    tx: &mpsc::UnboundedSender<String>,
) -> Option<String> {
    let payload = parsed.get("payload").cloned().unwrap_or_default();
    let aid = payload
        .get("agent_id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let hostname = payload
        .get("hostname")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let version = payload
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    if aid.is_empty() {
        let err_msg = serde_json::json!({
            "type": "agent:register:error",
            "payload": { "error": "agent_id is required" }
        });
        let _ = tx.send(err_msg.to_string());
        return None;
    }

    // Record liveness in the agents table.
    let db = state.db.clone();
    let aid2 = aid.clone();
    let hostname2 = hostname.clone();
    let version2 = version.clone();
    let recorded = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        agent::upsert_seen(&conn, &aid2, &hostname2, &version2)
    })
    .await
    .map(|r| r.is_ok())
    .unwrap_or(false);

    if !recorded {
        let err_msg = serde_json::json!({
            "type": "agent:register:error",
            "payload": { "error": "Failed to record agent" }
        });
        let _ = tx.send(err_msg.to_string());
        return None;
    }

    tracing::info!(
        "Agent registered: agent_id={}, hostname={}, version={}",
        aid,
        hostname,
        version
    );
    state
        .agents
        .register(aid.clone(), hostname, version.clone(), tx.clone());

    let ok_msg = serde_json::json!({
        "type": "agent:register:ok",
        "payload": { "agent_id": aid }
    });
    let _ = tx.send(ok_msg.to_string());

    state.ui.broadcast(
        "agent:connected",
        serde_json::json!({ "agentId": aid, "version": version }),
    );

    Some(aid)
}

async fn handle_agent_event(msg_type: &str, parsed: &Value, agent_id: &str, state: &Arc<AppState>) {
    let timestamp = parsed
        .get("timestamp")
        .and_then(|t| t.as_str())
        .and_then(|t| t.parse::<DateTime<Utc>>().ok())
        .unwrap_or_else(Utc::now);
    let data = parsed.get("data").cloned().unwrap_or(Value::Null);

    match msg_type {
        "file_transfer_started" | "file_transfer_progress" | "file_transfer_completed" => {
            let ev = match NormalizedTransferEvent::from_wire(msg_type, timestamp, &data) {
                Ok(ev) => ev,
                Err(field) => {
                    let err = IngestError::Dropped(field);
                    tracing::debug!("dead-lettering {} event: {}", msg_type, err);
                    state.manager.record_dropped();
                    return;
                }
            };

            match state.manager.apply(ev.clone()).await {
                Ok(Applied::Persisted { .. }) => {
                    state.ui.broadcast(
                        &format!("transfer:{}", ev.status.as_str()),
                        serde_json::json!({
                            "jobId": ev.job_id,
                            "agentId": ev.agent_id,
                            "fileName": ev.file_name,
                            "progress": ev.progress,
                        }),
                    );
                }
                // Absorbed outcomes are already counted by the manager.
                Ok(_) => {}
                Err(IngestError::FatalPersistence(e)) => {
                    tracing::error!("fatal persistence failure: {}", e);
                }
                Err(e) => {
                    tracing::warn!("event reconciliation failed, awaiting redelivery: {}", e);
                }
            }
        }
        // Opaque counter; never unpacked into file records.
        "file_operations_summary" => {
            let dropped = data.get("dropped_count").and_then(|v| v.as_u64()).unwrap_or(0);
            state.manager.record_summarized(dropped);
            state.ui.broadcast("transfer:summary", data);
        }
        "folder_scan_progress" => {
            if let Some(job_id) = data.get("folder").and_then(|v| v.as_str()) {
                state.manager.sessions().observe_scan(job_id, agent_id, timestamp);
            }
            state.ui.broadcast(msg_type, data);
        }
        _ => {
            // Status and device events matter to dashboards, not to the
            // transfer state machine.
            state.ui.broadcast(msg_type, data);
        }
    }
}
