//! Typed projection of inbound agent events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The three transfer-event kinds the reconciler accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEventKind {
    Started,
    Progress,
    Completed,
}

impl TransferEventKind {
    pub fn from_wire(event_type: &str) -> Option<Self> {
        match event_type {
            "file_transfer_started" => Some(Self::Started),
            "file_transfer_progress" => Some(Self::Progress),
            "file_transfer_completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "file_transfer_started",
            Self::Progress => "file_transfer_progress",
            Self::Completed => "file_transfer_completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Wire payload of a `file_transfer_*` event.
#[derive(Debug, Clone, Deserialize)]
struct TransferPayload {
    job_id: String,
    #[serde(default)]
    session_id: Option<String>,
    agent_id: String,
    file_name: String,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    file_size: u64,
    #[serde(default)]
    delta_bytes_transferred: u64,
    #[serde(default)]
    delta_bytes_completed: u64,
    #[serde(default = "default_action")]
    action: String,
    status: TransferStatus,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    transfer_rate: f64,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    compression_ratio: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

fn default_action() -> String {
    "update".to_string()
}

/// A fully-typed transfer event, ready for the reconciler.
#[derive(Debug, Clone)]
pub struct NormalizedTransferEvent {
    pub kind: TransferEventKind,
    pub timestamp: DateTime<Utc>,
    pub job_id: String,
    pub session_id: Option<String>,
    pub agent_id: String,
    pub file_name: String,
    pub file_path: Option<String>,
    pub file_size: u64,
    pub delta_bytes_transferred: u64,
    pub delta_bytes_completed: u64,
    pub action: String,
    pub status: TransferStatus,
    pub progress: f64,
    pub transfer_rate: f64,
    pub duration: f64,
    pub compression_ratio: Option<f64>,
    pub error: Option<String>,
}

impl NormalizedTransferEvent {
    /// Parse a wire frame. Returns `Err` with the offending field when a
    /// required field is missing or empty; such events are dead-lettered.
    pub fn from_wire(
        event_type: &str,
        timestamp: DateTime<Utc>,
        data: &Value,
    ) -> Result<Self, String> {
        let kind = TransferEventKind::from_wire(event_type)
            .ok_or_else(|| format!("unsupported event type {event_type}"))?;
        let payload: TransferPayload =
            serde_json::from_value(data.clone()).map_err(|e| e.to_string())?;

        if payload.job_id.is_empty() {
            return Err("job_id".to_string());
        }
        if payload.file_name.is_empty() {
            return Err("file_name".to_string());
        }
        if payload.agent_id.is_empty() {
            return Err("agent_id".to_string());
        }

        // Inverted byte counts are clamped, never rejected.
        let delta_completed = if payload.delta_bytes_transferred > 0 {
            payload.delta_bytes_completed.min(payload.delta_bytes_transferred)
        } else {
            payload.delta_bytes_completed
        };

        Ok(Self {
            kind,
            timestamp,
            job_id: payload.job_id,
            session_id: payload.session_id,
            agent_id: payload.agent_id,
            file_name: payload.file_name,
            file_path: payload.file_path.filter(|p| !p.is_empty()),
            file_size: payload.file_size,
            delta_bytes_transferred: payload.delta_bytes_transferred,
            delta_bytes_completed: delta_completed,
            action: payload.action,
            status: payload.status,
            progress: payload.progress.clamp(0.0, 100.0),
            transfer_rate: payload.transfer_rate.max(0.0),
            duration: payload.duration.max(0.0),
            compression_ratio: payload.compression_ratio,
            error: payload.error.filter(|e| !e.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "job_id": "job-1",
            "agent_id": "agent-1",
            "file_name": "a.txt",
            "file_size": 1000,
            "delta_bytes_transferred": 500,
            "delta_bytes_completed": 500,
            "action": "update",
            "status": "in_progress",
            "progress": 50.0
        })
    }

    #[test]
    fn test_parse_progress_event() {
        let ev =
            NormalizedTransferEvent::from_wire("file_transfer_progress", Utc::now(), &payload())
                .unwrap();
        assert_eq!(ev.kind, TransferEventKind::Progress);
        assert_eq!(ev.status, TransferStatus::InProgress);
        assert_eq!(ev.file_size, 1000);
        assert_eq!(ev.progress, 50.0);
    }

    #[test]
    fn test_missing_job_id_rejected() {
        let mut data = payload();
        data["job_id"] = json!("");
        let err = NormalizedTransferEvent::from_wire("file_transfer_progress", Utc::now(), &data)
            .unwrap_err();
        assert_eq!(err, "job_id");
    }

    #[test]
    fn test_unsupported_type_rejected() {
        assert!(
            NormalizedTransferEvent::from_wire("sync_status", Utc::now(), &payload()).is_err()
        );
    }

    #[test]
    fn test_progress_clamped() {
        let mut data = payload();
        data["progress"] = json!(150.0);
        let ev = NormalizedTransferEvent::from_wire("file_transfer_progress", Utc::now(), &data)
            .unwrap();
        assert_eq!(ev.progress, 100.0);

        data["progress"] = json!(-3.0);
        let ev = NormalizedTransferEvent::from_wire("file_transfer_progress", Utc::now(), &data)
            .unwrap();
        assert_eq!(ev.progress, 0.0);
    }

    #[test]
    fn test_empty_error_treated_as_none() {
        let mut data = payload();
        data["status"] = json!("completed");
        data["error"] = json!("");
        let ev = NormalizedTransferEvent::from_wire("file_transfer_completed", Utc::now(), &data)
            .unwrap();
        assert!(ev.error.is_none());
    }
}
