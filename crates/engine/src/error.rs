//! Engine error types.

use chunklift_model::SessionStatus;

/// Errors surfaced across the coordinator boundary.
///
/// Part-level transient failures never appear here; they are absorbed by
/// the retry loop and observable only through session status and progress
/// snapshots.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] chunklift_model::InvalidConfig),

    #[error("store error: {0}")]
    Store(#[from] chunklift_store::StoreError),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunklift_transfer::TransferError),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {session_id} is {status}, cannot {op}")]
    InvalidState {
        session_id: String,
        status: SessionStatus,
        op: &'static str,
    },

    #[error("session {0} has no active runtime")]
    NotAttached(String),

    #[error("persisted parts of session {0} no longer match the chunk plan")]
    PlanMismatch(String),
}
