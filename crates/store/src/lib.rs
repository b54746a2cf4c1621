//! Durable session/part store: the single source of truth for all status
//! transitions.
//!
//! Every status change goes through a compare-and-swap style operation keyed
//! by session id or `(session id, part number)`, so concurrent part
//! completions can never observe or write stale state. Two implementations
//! are provided: [`MemoryStore`] for tests and ephemeral use, and
//! [`JsonFileStore`] which persists one JSON document per session and
//! survives process restarts.

mod json_file;
mod memory;
mod record;

use async_trait::async_trait;
use chunklift_model::{SessionStatus, UploadPart, UploadSession};

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub(crate) use record::SessionRecord;

/// Errors produced by the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("part {part_number} not found in session {session_id}")]
    PartNotFound { session_id: String, part_number: u32 },

    #[error("session {0} already exists")]
    SessionExists(String),

    #[error("session {session_id} is {actual}, expected one of [{expected}]")]
    InvalidSessionTransition {
        session_id: String,
        actual: SessionStatus,
        expected: String,
    },

    #[error("part {part_number} of session {session_id} is {actual}, cannot apply {update}")]
    InvalidPartTransition {
        session_id: String,
        part_number: u32,
        actual: String,
        update: String,
    },

    #[error("corrupt session record: {0}")]
    Corrupt(String),
}

/// Atomic read-modify-write applied to a single part.
///
/// The closed set of transitions keeps the token invariant (`integrity_token`
/// set iff `Uploaded`) inside the store instead of trusting callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartUpdate {
    /// `Pending` → `Uploading`; stamps `last_attempt_at`. Persisted before
    /// the network call begins so a crash mid-upload is detectable.
    Launch,
    /// `Uploading` → `Uploaded`; records the backend token.
    Uploaded { integrity_token: String },
    /// Failed attempt with retry budget left: → `Pending`, bumps
    /// `retry_count`, clears any token.
    RetryableFailure,
    /// Failed attempt past the retry budget: → `Failed`, bumps `retry_count`.
    ExhaustedFailure,
    /// Recovery reset for a part stuck in `Uploading`: → `Pending`,
    /// clears the token, leaves `retry_count` untouched.
    Reset,
}

impl PartUpdate {
    fn name(&self) -> &'static str {
        match self {
            Self::Launch => "launch",
            Self::Uploaded { .. } => "uploaded",
            Self::RetryableFailure => "retryable_failure",
            Self::ExhaustedFailure => "exhausted_failure",
            Self::Reset => "reset",
        }
    }
}

/// Durable CRUD persistence for sessions and parts, queryable by status.
///
/// Implementations must apply each operation atomically with respect to the
/// others; the engine relies on that to serialize concurrent completions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new session. Fails if the id already exists.
    async fn create_session(&self, session: &UploadSession) -> Result<(), StoreError>;

    /// Persists the full part set of a session (numbers `1..=total_parts`).
    async fn create_parts(&self, session_id: &str, parts: &[UploadPart])
    -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<UploadSession>, StoreError>;

    /// Parts of a session ordered by part number.
    async fn get_parts(&self, session_id: &str) -> Result<Vec<UploadPart>, StoreError>;

    async fn sessions_by_status(
        &self,
        status: SessionStatus,
    ) -> Result<Vec<UploadSession>, StoreError>;

    /// Compare-and-swap on the session status: succeeds only when the
    /// current status is in `expected`. Returns the updated record.
    async fn transition_session(
        &self,
        session_id: &str,
        expected: &[SessionStatus],
        to: SessionStatus,
    ) -> Result<UploadSession, StoreError>;

    /// Records the terminal error message of a session.
    async fn set_session_error(&self, session_id: &str, error: &str) -> Result<(), StoreError>;

    /// Records the backend-assigned multipart upload id (set once).
    async fn set_remote_upload_id(
        &self,
        session_id: &str,
        remote_upload_id: &str,
    ) -> Result<(), StoreError>;

    /// Atomic read-modify-write on one part. Returns the updated part.
    async fn update_part(
        &self,
        session_id: &str,
        part_number: u32,
        update: PartUpdate,
    ) -> Result<UploadPart, StoreError>;

    /// Removes a session and all of its parts. Used only by the recovery
    /// sweep's retention policy on terminal sessions.
    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError>;
}
