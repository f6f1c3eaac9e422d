//! Outbound event model.
//!
//! Everything the bridge emits toward the server is an `AgentEvent`: a type
//! tag, a timestamp, and a JSON payload. Consumers must treat
//! `file_operations_summary` as an opaque counter, never as individual file
//! records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound event type names.
pub mod types {
    pub const FILE_TRANSFER_STARTED: &str = "file_transfer_started";
    pub const FILE_TRANSFER_PROGRESS: &str = "file_transfer_progress";
    pub const FILE_TRANSFER_COMPLETED: &str = "file_transfer_completed";
    pub const SYNC_STATUS: &str = "sync_status";
    pub const SYNC_ERROR: &str = "sync_error";
    pub const SYNC_COMPLETED: &str = "sync_completed";
    pub const FOLDER_SYNC_COMPLETED: &str = "folder_sync_completed";
    pub const DEVICE_CONNECTED: &str = "device_connected";
    pub const DEVICE_DISCONNECTED: &str = "device_disconnected";
    pub const STATE_CHANGED: &str = "state_changed";
    pub const DEVICE_DISCOVERED: &str = "device_discovered";
    pub const DEVICE_REJECTED: &str = "device_rejected";
    pub const LOCAL_CHANGE_DETECTED: &str = "local_change_detected";
    pub const REMOTE_CHANGE_DETECTED: &str = "remote_change_detected";
    pub const FOLDER_SCAN_PROGRESS: &str = "folder_scan_progress";
    pub const FOLDER_REJECTED: &str = "folder_rejected";
    pub const CONFIG_SAVED: &str = "config_saved";
    pub const REMOTE_DOWNLOAD_PROGRESS: &str = "remote_download_progress";
    pub const LOCAL_INDEX_UPDATED: &str = "local_index_updated";
    pub const REMOTE_INDEX_UPDATED: &str = "remote_index_updated";
    pub const FILE_OPERATIONS_SUMMARY: &str = "file_operations_summary";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl AgentEvent {
    pub fn new(event_type: &str, timestamp: DateTime<Utc>, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp,
            data,
        }
    }

    /// Whether this event bypasses batching and, under saturation, is held
    /// in the overflow ring instead of being dropped.
    pub fn is_high_priority(&self) -> bool {
        self.event_type.contains("error")
            || matches!(
                self.event_type.as_str(),
                types::SYNC_COMPLETED | types::FOLDER_SYNC_COMPLETED
            )
    }
}

/// Typed payload for the `file_transfer_*` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEventData {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub agent_id: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub file_size: u64,
    pub delta_bytes_transferred: u64,
    pub delta_bytes_completed: u64,
    /// One of `update`, `delete`, `metadata`.
    pub action: String,
    /// One of `started`, `in_progress`, `completed`, `failed`.
    pub status: String,
    /// Percent complete in `[0, 100]`.
    pub progress: f64,
    /// Bytes per second; zero when unknown.
    pub transfer_rate: f64,
    /// Seconds from start to finish; zero until completion.
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferEventData {
    pub fn into_event(self, event_type: &str, timestamp: DateTime<Utc>) -> AgentEvent {
        let data = serde_json::to_value(&self).unwrap_or(Value::Null);
        AgentEvent::new(event_type, timestamp, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_high_priority_classification() {
        let now = Utc::now();
        let high = [
            types::SYNC_ERROR,
            types::SYNC_COMPLETED,
            types::FOLDER_SYNC_COMPLETED,
            "folder_error",
            "connection_error",
        ];
        for t in high {
            assert!(AgentEvent::new(t, now, json!({})).is_high_priority(), "{t}");
        }
        let low = [
            types::FILE_TRANSFER_PROGRESS,
            types::STATE_CHANGED,
            types::DEVICE_REJECTED,
            types::FILE_OPERATIONS_SUMMARY,
        ];
        for t in low {
            assert!(!AgentEvent::new(t, now, json!({})).is_high_priority(), "{t}");
        }
    }

    #[test]
    fn test_wire_shape() {
        let event = AgentEvent::new(types::SYNC_STATUS, Utc::now(), json!({"folder": "docs"}));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"sync_status""#));
        assert!(json.contains(r#""folder":"docs""#));
    }
}
