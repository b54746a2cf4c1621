//! Session and part records, status enums, configuration, and progress.
//!
//! Status enums carry stable `snake_case` string codes so they round-trip
//! exactly through the durable store. Unknown codes are a parse error,
//! never silently coerced.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::planner::MIN_CHUNK_BYTES;

/// Error returned when a persisted status code is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status code: {0:?}")]
pub struct UnknownStatus(pub String);

/// Lifecycle status of an upload session.
///
/// `Completed`, `Failed`, and `Aborted` are terminal: a session never
/// leaves them, it is only garbage-collected after a retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "aborted")]
    Aborted,
}

impl SessionStatus {
    /// Stable string code used for persistence and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    /// Returns true once the session can never make further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a single part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "uploaded")]
    Uploaded,
    #[serde(rename = "failed")]
    Failed,
}

impl PartStatus {
    /// Stable string code used for persistence and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for PartStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "uploaded" => Ok(Self::Uploaded),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for PartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open byte range `[start, end)` within the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered by this range.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Network precondition for dispatching part uploads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkRequirement {
    /// Any connectivity is acceptable.
    #[default]
    #[serde(rename = "any")]
    Any,
    /// Only unmetered connectivity (e.g. Wi-Fi) is acceptable.
    #[serde(rename = "unmetered")]
    Unmetered,
}

/// Environmental preconditions captured at session creation.
///
/// The constraint monitor compares live platform signals against this
/// snapshot; the engine only sees satisfied/violated transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintPolicy {
    #[serde(default)]
    pub network: NetworkRequirement,
    #[serde(default)]
    pub requires_charging: bool,
}

/// One resumable upload of a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub session_id: String,
    /// Local path of the source file. The engine only reads through it.
    pub source_path: String,
    pub file_name: String,
    pub total_bytes: u64,
    pub chunk_bytes: u64,
    /// Fixed for the life of the session; parts `1..=total_parts` always exist.
    pub total_parts: u32,
    /// Backend-assigned multipart upload id, set once on initiation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_upload_id: Option<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub constraints: ConstraintPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One contiguous chunk of a session, uploaded independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPart {
    pub session_id: String,
    /// 1-based, unique within the session.
    pub part_number: u32,
    pub range: ByteRange,
    pub status: PartStatus,
    /// Backend-issued proof of receipt. Present iff `status == Uploaded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity_token: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl UploadPart {
    /// Creates a fresh pending part.
    pub fn new(session_id: &str, part_number: u32, range: ByteRange) -> Self {
        Self {
            session_id: session_id.to_string(),
            part_number,
            range,
            status: PartStatus::Pending,
            integrity_token: None,
            retry_count: 0,
            last_attempt_at: None,
        }
    }
}

/// Tunables for a single upload session.
///
/// Not persisted as-is; the constraint policy is snapshotted onto the
/// session record, everything else is engine-local.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Size of each part except possibly the last. Must be at least
    /// [`MIN_CHUNK_BYTES`].
    pub chunk_bytes: u64,
    /// Concurrent part uploads per session, clamped to `1..=10`.
    pub max_concurrent_parts: usize,
    /// A part becomes permanently failed when `retry_count > max_retries`.
    pub max_retries: u32,
    /// Base delay between retry attempts of a failed part.
    pub retry_delay: Duration,
    /// When true the retry delay doubles per attempt (capped at 2^10).
    pub exponential_backoff: bool,
    /// Bound on each presign/transmit network call. A timeout counts as a
    /// transient failure.
    pub network_timeout: Duration,
    /// How long constraints must stay satisfied before auto-resume fires.
    pub auto_resume_delay: Duration,
    pub constraints: ConstraintPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: 8 * 1024 * 1024,
            max_concurrent_parts: 4,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            exponential_backoff: true,
            network_timeout: Duration::from_secs(60),
            auto_resume_delay: Duration::from_secs(3),
            constraints: ConstraintPolicy::default(),
        }
    }
}

impl UploadConfig {
    /// Validates the chunk size against the backend minimum.
    pub fn validate(&self) -> Result<(), crate::planner::InvalidConfig> {
        if self.chunk_bytes < MIN_CHUNK_BYTES {
            return Err(crate::planner::InvalidConfig::ChunkTooSmall {
                chunk_bytes: self.chunk_bytes,
                min: MIN_CHUNK_BYTES,
            });
        }
        Ok(())
    }

    /// Concurrency limit clamped to the supported `1..=10` window.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrent_parts.clamp(1, 10)
    }
}

/// Point-in-time view of a session, emitted after every state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub session_id: String,
    pub file_name: String,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
    pub total_parts: u32,
    pub uploaded_parts: u32,
    /// Lowest part number currently in flight, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_part: Option<u32>,
    /// Fraction of the current part transmitted (0.0 or 1.0 at this
    /// granularity — a part is transmitted in a single call).
    pub current_part_progress: f64,
    /// Overall fraction in `[0.0, 1.0]`.
    pub overall_progress: f64,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_per_second: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressSnapshot {
    /// Overall progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        self.overall_progress * 100.0
    }
}
