//! Reverse WebSocket client — connects to the control-plane server.
//!
//! The agent initiates and maintains a persistent WebSocket connection to
//! the server at `ws://{server_url}/ws/agent`. This is the only upstream
//! channel: a registration handshake identifies the agent, then every
//! outbound `AgentEvent` produced by the bridge is forwarded as one JSON
//! text frame.

use crate::bridge::event::AgentEvent;
use crate::Result;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Control messages received from the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "agent:register:ok")]
    RegisterOk { agent_id: String },

    #[serde(rename = "agent:register:error")]
    RegisterError { error: String },
}

/// Reverse WebSocket client that forwards bridge events to the server.
pub struct AgentWsClient {
    server_url: String,
    agent_id: String,
    events: Mutex<mpsc::Receiver<AgentEvent>>,
    shutdown: CancellationToken,
}

impl AgentWsClient {
    pub fn new(
        server_url: String,
        agent_id: String,
        events: mpsc::Receiver<AgentEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            server_url,
            agent_id,
            events: Mutex::new(events),
            shutdown,
        }
    }

    /// Run the WebSocket client with automatic reconnection.
    pub async fn run(&self) {
        let mut backoff_ms: u64 = 1000;
        let max_backoff_ms: u64 = 30000;

        loop {
            if self.shutdown.is_cancelled() {
                info!("WS client shutting down");
                return;
            }

            match self.connect_and_run().await {
                Ok(()) => {
                    info!("WS client connection closed normally");
                    backoff_ms = 1000;
                }
                Err(e) => {
                    warn!("WS client connection error: {}", e);
                }
            }

            if self.shutdown.is_cancelled() {
                return;
            }

            info!("Reconnecting in {}ms...", backoff_ms);
            tokio::select! {
                _ = tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)) => {}
                _ = self.shutdown.cancelled() => return,
            }

            backoff_ms = (backoff_ms * 2).min(max_backoff_ms);
        }
    }

    async fn connect_and_run(&self) -> Result<()> {
        let ws_url = self
            .server_url
            .replace("http://", "ws://")
            .replace("https://", "wss://");
        let url = format!("{}/ws/agent", ws_url);

        info!("Connecting to server WebSocket: {}", url);

        let (ws_stream, _) = connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();

        info!("Connected to server WebSocket");

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let register_msg = serde_json::json!({
            "type": "agent:register",
            "payload": {
                "agent_id": self.agent_id,
                "hostname": hostname,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });

        write
            .send(Message::Text(register_msg.to_string().into()))
            .await?;
        info!("Registration handshake sent");

        let mut events = self.events.lock().await;

        loop {
            tokio::select! {
                // Forward bridge events to the server.
                event = events.recv() => {
                    match event {
                        Some(agent_event) => {
                            let json = serde_json::to_string(&agent_event)?;
                            if write.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            info!("Bridge channel closed, closing WS client");
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }

                // Handle incoming messages from the server.
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handle_server_message(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if write.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Server closed WebSocket connection");
                            break;
                        }
                        Some(Err(e)) => {
                            error!("WebSocket read error: {}", e);
                            break;
                        }
                        _ => {}
                    }
                }

                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received, closing WS client");
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }

        Ok(())
    }
}

fn handle_server_message(text: &str) {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(ServerMessage::RegisterOk { agent_id }) => {
            info!("Registration confirmed for agent_id: {}", agent_id);
        }
        Ok(ServerMessage::RegisterError { error }) => {
            error!("Registration failed: {}", error);
        }
        Err(e) => {
            warn!("Failed to parse server message: {} (raw: {})", e, text);
        }
    }
}
