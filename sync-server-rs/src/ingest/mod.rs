//! Event ingestion pipeline: dedup, state reconciliation, persistence.

pub mod event;
pub mod hasher;
pub mod metrics;
pub mod reconciler;
pub mod session;
pub mod state_machine;

use thiserror::Error;

/// Failures the pipeline cannot absorb into counters.
///
/// Everything transient is recovered by transport-level redelivery, with
/// dedup absorbing the duplicates; only fatal errors surface to operators.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("event missing required fields: {0}")]
    Dropped(String),

    #[error("transient persistence failure: {0}")]
    TransientPersistence(String),

    #[error("fatal persistence failure: {0}")]
    FatalPersistence(String),
}

impl From<rusqlite::Error> for IngestError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if matches!(
                    err.code,
                    ErrorCode::NotADatabase
                        | ErrorCode::CannotOpen
                        | ErrorCode::PermissionDenied
                        | ErrorCode::ReadOnly
                ) =>
            {
                IngestError::FatalPersistence(e.to_string())
            }
            _ => IngestError::TransientPersistence(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for IngestError {
    fn from(e: r2d2::Error) -> Self {
        IngestError::TransientPersistence(e.to_string())
    }
}
