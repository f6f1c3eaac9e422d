//! Per-file transfer state machine.
//!
//! States progress only along the permitted transitions below; anything
//! else is a transition conflict and leaves persistent state untouched.
//!
//! ```text
//! pending     , file_transfer_started   -> started
//! started     , file_transfer_progress  -> in_progress
//! started     , file_transfer_completed -> completed | failed
//! in_progress , file_transfer_progress  -> in_progress
//! in_progress , file_transfer_completed -> completed | failed
//! failed      , file_transfer_started   -> started          (retry)
//! completed   , *                       -> rejected
//! ```

use crate::ingest::event::{TransferEventKind, TransferStatus};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Started,
    InProgress,
    Completed,
    Failed,
}

impl TransferState {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "started" => Some(Self::Started),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// An event whose kind is inadmissible given the stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionConflict {
    pub current: TransferState,
    pub kind: TransferEventKind,
}

impl fmt::Display for TransitionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event {} not permitted in state {}",
            self.kind.as_str(),
            self.current.as_str()
        )
    }
}

/// Resolve the state an accepted event moves the row into.
pub fn next_state(
    current: TransferState,
    kind: TransferEventKind,
    incoming: TransferStatus,
) -> Result<TransferState, TransitionConflict> {
    use TransferEventKind as K;
    use TransferState::*;

    let next = match (current, kind) {
        (Pending, K::Started) => Started,
        (Started, K::Progress) => InProgress,
        (Started, K::Completed) => terminal_for(incoming),
        (InProgress, K::Progress) => InProgress,
        (InProgress, K::Completed) => terminal_for(incoming),
        (Failed, K::Started) => Started,
        _ => return Err(TransitionConflict { current, kind }),
    };
    Ok(next)
}

fn terminal_for(incoming: TransferStatus) -> TransferState {
    match incoming {
        TransferStatus::Failed => TransferState::Failed,
        _ => TransferState::Completed,
    }
}
