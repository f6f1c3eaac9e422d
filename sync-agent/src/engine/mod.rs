//! Interfaces to the embedded sync engine.
//!
//! The engine is an external collaborator: the bridge consumes two narrow
//! interfaces, one for the event subscription and one for file-info lookups.
//! Keeping them separate avoids a back-reference between the engine client
//! and the bridge.

pub mod payload;
pub mod rest;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Raw event types emitted by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ItemStarted,
    ItemFinished,
    DownloadProgress,
    FolderSummary,
    FolderCompletion,
    FolderErrors,
    DeviceConnected,
    DeviceDisconnected,
    StateChanged,
    FolderScanProgress,
    LocalChange,
    RemoteChange,
    LocalIndexUpdated,
    RemoteIndexUpdated,
    FolderRejected,
    ConfigSaved,
    RemoteDownloadProgress,
}

impl EventType {
    /// Parse the engine's wire name for an event type.
    ///
    /// Unknown names return `None`; the subscription pump skips them so a
    /// newer engine cannot wedge the stream.
    pub fn from_wire(name: &str) -> Option<Self> {
        Some(match name {
            "ItemStarted" => Self::ItemStarted,
            "ItemFinished" => Self::ItemFinished,
            "DownloadProgress" => Self::DownloadProgress,
            "FolderSummary" => Self::FolderSummary,
            "FolderCompletion" => Self::FolderCompletion,
            "FolderErrors" => Self::FolderErrors,
            "DeviceConnected" => Self::DeviceConnected,
            "DeviceDisconnected" => Self::DeviceDisconnected,
            "StateChanged" => Self::StateChanged,
            "LocalChangeDetected" => Self::LocalChange,
            "RemoteChangeDetected" => Self::RemoteChange,
            "FolderScanProgress" => Self::FolderScanProgress,
            "LocalIndexUpdated" => Self::LocalIndexUpdated,
            "RemoteIndexUpdated" => Self::RemoteIndexUpdated,
            "FolderRejected" => Self::FolderRejected,
            "ConfigSaved" => Self::ConfigSaved,
            "RemoteDownloadProgress" => Self::RemoteDownloadProgress,
            _ => return None,
        })
    }
}

/// A raw event as received from the engine's event stream.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Monotone event id assigned by the engine.
    pub id: i64,
    pub event_type: EventType,
    pub time: DateTime<Utc>,
    /// Loosely-typed payload; shape varies per event type.
    pub data: Value,
}

/// Errors surfaced by engine lookups.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient engine error: {0}")]
    Transient(String),
}

/// A finite stream of raw events; closes when the subscription is dropped.
pub type EventStream = mpsc::Receiver<RawEvent>;

/// Event subscription side of the engine.
pub trait EngineSubscription: Send + Sync {
    /// Begin streaming events. The stream closes on `unsubscribe`.
    fn subscribe(&self, subscriber_id: &str) -> BoxFuture<'_, Result<EventStream, EngineError>>;

    /// Stop the stream started by `subscribe`.
    fn unsubscribe(&self, subscriber_id: &str) -> BoxFuture<'_, ()>;
}

/// Query side of the engine.
pub trait EngineQuery: Send + Sync {
    /// Look up the size in bytes of a file known to the engine.
    ///
    /// Callers must tolerate both `NotFound` and `Transient`; neither is
    /// retried here.
    fn file_info<'a>(
        &'a self,
        folder: &'a str,
        item: &'a str,
    ) -> BoxFuture<'a, Result<u64, EngineError>>;
}
