//! Transfer error taxonomy.

use std::time::Duration;

/// Errors produced while moving part bytes.
///
/// The engine's retry loop keys off [`is_retryable`](Self::is_retryable):
/// transient failures and timeouts are retried with backoff, everything
/// else fails the part (or the whole session for source errors).
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    /// Network-level failure worth retrying (connection reset, 5xx, 429).
    #[error("transient network error: {0}")]
    Transient(String),

    /// Attempt exceeded the configured network timeout. Retried like a
    /// transient failure.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Backend explicitly rejected the request (non-429 4xx). Not retried.
    #[error("backend rejected request: {0}")]
    Permanent(String),

    /// Local source unavailable or changed underneath us. Session-fatal.
    #[error("source read error: {0}")]
    SourceRead(String),

    /// The attempt was cancelled. Expected during cancel/teardown, never
    /// logged as a failure.
    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    /// True when the retry loop should attempt this part again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability() {
        assert!(TransferError::Transient("reset".into()).is_retryable());
        assert!(TransferError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!TransferError::Permanent("403".into()).is_retryable());
        assert!(!TransferError::SourceRead("gone".into()).is_retryable());
        assert!(!TransferError::Cancelled.is_retryable());
    }
}
