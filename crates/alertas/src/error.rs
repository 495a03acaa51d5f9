//! Error types for the deviation engine.

use thiserror::Error;

use crate::types::AlertStatus;

/// Errors surfaced by the calculation pipeline and the alert store.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Project or its cost ledger could not be read; fatal to that
    /// project's pipeline only.
    #[error("project data unavailable for {obra_id}: {reason}")]
    DataUnavailable { obra_id: String, reason: String },

    /// Illegal lifecycle status change; state is left unchanged.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },

    /// Threshold boundaries rejected at write time.
    #[error("invalid threshold configuration: {0}")]
    ConfigInvalid(String),

    /// Concurrent upsert collision on the active-alert uniqueness
    /// invariant, after the internal retry.
    #[error("write conflict: {0}")]
    WriteConflict(String),

    /// Underlying SQLite failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Requested record does not exist.
    #[error("{0} not found")]
    NotFound(String),
}

impl EngineError {
    /// Whether a failed store write should be retried once before
    /// surfacing as a conflict.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Storage(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
