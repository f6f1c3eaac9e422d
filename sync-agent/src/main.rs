//! Sync Agent - Main entry point
//!
//! Bridges the local sync engine's event stream to the control-plane
//! server.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use sync_agent::bridge::EventBridge;
use sync_agent::engine::rest::RestEngineClient;
use sync_agent::{api, config::Config, daemon::shutdown::ShutdownCoordinator, ws};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = if let Some(config_path) = args.config {
        Config::from_file(&config_path)?
    } else {
        Config::fallback()
    };

    // Initialize logging; the CLI flag wins over the config file, the
    // RUST_LOG environment variable over both.
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .init();

    api::health::init_start_time();

    tracing::info!(
        "Starting sync-agent v{} (agent_id: {})",
        env!("CARGO_PKG_VERSION"),
        config.agent.id
    );

    let port = args.port.unwrap_or(config.agent.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let shutdown = ShutdownCoordinator::new(&config.bridge);
    let cancel = shutdown.token();

    // Engine client serves both the subscription and the file-info query.
    let engine = Arc::new(RestEngineClient::new(
        config.engine.url.clone(),
        config.engine.api_key.clone(),
    ));

    let (bridge, outbound) = EventBridge::new(
        config.agent.id.clone(),
        config.bridge.clone(),
        engine.clone(),
        engine,
        cancel.clone(),
    );

    let app_state = api::AppState {
        bridge_stats: bridge.stats(),
    };
    let app = api::create_router(app_state);

    let bridge_handle = tokio::spawn(bridge.run());

    // Reverse WebSocket client pushes bridge output to the server.
    let ws_cancel = cancel.clone();
    let server_url = config.server.url.clone();
    let agent_id = config.agent.id.clone();
    let ws_client_handle = tokio::spawn(async move {
        let client = ws::client::AgentWsClient::new(server_url, agent_id, outbound, ws_cancel);
        client.run().await;
    });

    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Health endpoint: http://{}/health", addr);
    tracing::info!("Stats endpoint: http://{}/stats", addr);
    tracing::info!("Server connection: {}/ws/agent", config.server.url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    // Wait for shutdown signal; the coordinator cancels every task, then
    // the settle window lets the final drain and flush reach the wire.
    shutdown.wait_for_signal().await;
    shutdown.settle().await;

    match tokio::time::timeout(std::time::Duration::from_secs(5), bridge_handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("Bridge shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!("Bridge error during shutdown: {}", e),
        Ok(Err(e)) => tracing::error!("Bridge task panicked: {}", e),
        Err(_) => tracing::warn!("Bridge shutdown timeout"),
    }

    let _ = tokio::time::timeout(std::time::Duration::from_secs(3), ws_client_handle).await;

    server_handle.abort();
    tracing::info!("Agent stopped");

    Ok(())
}
