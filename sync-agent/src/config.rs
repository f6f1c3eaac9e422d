//! Configuration management for the sync agent.
//!
//! Loads configuration from a TOML file; CLI flags override individual
//! fields.

use crate::bridge::BridgeTuning;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    pub engine: EngineConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub bridge: BridgeTuning,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Unique agent identifier.
    #[serde(default = "default_agent_id")]
    pub id: String,

    /// Local HTTP API port.
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the local sync engine REST API.
    #[serde(default = "default_engine_url")]
    pub url: String,

    /// API key for the engine REST API.
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Control-plane server URL.
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_agent_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "sync-agent-01".to_string())
}

fn default_port() -> u16 {
    9990
}

fn default_engine_url() -> String {
    "http://127.0.0.1:8384".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Configuration with built-in defaults and a local server.
    pub fn fallback() -> Self {
        Self {
            agent: AgentConfig {
                id: default_agent_id(),
                port: default_port(),
            },
            engine: EngineConfig {
                url: default_engine_url(),
                api_key: String::new(),
            },
            server: ServerConfig {
                url: "http://localhost:3000".to_string(),
            },
            bridge: BridgeTuning::default(),
            log: LogConfig::default(),
        }
    }
}
