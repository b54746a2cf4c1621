//! Startup recovery and terminal-session cleanup.
//!
//! After a crash the store can hold sessions still marked in progress with
//! parts stuck in `uploading` from attempts that died with the process.
//! The sweep resets those parts and re-attaches a dispatch loop to each
//! such session.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use chunklift_model::SessionStatus;
use chunklift_store::{SessionStore, StoreError};

use crate::coordinator::UploadCoordinator;
use crate::error::EngineError;

pub struct RecoverySweep {
    store: Arc<dyn SessionStore>,
    coordinator: Arc<UploadCoordinator>,
}

impl RecoverySweep {
    pub fn new(coordinator: Arc<UploadCoordinator>) -> Self {
        Self {
            store: coordinator.store(),
            coordinator,
        }
    }

    /// Finds in-progress sessions with no live dispatch loop and
    /// re-attaches them. Returns the ids of the sessions recovered.
    /// A session whose source no longer matches fails during attach; that
    /// is recorded per session, not propagated, so one broken session
    /// never blocks the rest of the sweep.
    pub async fn recover_interrupted(&self) -> Result<Vec<String>, EngineError> {
        // Pending covers a crash between session creation and initiation.
        let mut sessions = self
            .store
            .sessions_by_status(SessionStatus::InProgress)
            .await?;
        sessions.extend(
            self.store
                .sessions_by_status(SessionStatus::Pending)
                .await?,
        );

        let mut recovered = Vec::new();
        for session in sessions {
            if self.coordinator.is_attached(&session.session_id).await {
                continue;
            }
            info!(session = %session.session_id, "recovering interrupted session");
            match self.coordinator.attach(&session.session_id).await {
                Ok(()) => recovered.push(session.session_id),
                Err(e) => {
                    warn!(session = %session.session_id, error = %e, "recovery attach failed");
                }
            }
        }
        Ok(recovered)
    }

    /// Deletes terminal sessions whose last update is older than the
    /// retention window. Returns how many were removed.
    pub async fn cleanup_old_sessions(&self, retention: Duration) -> Result<usize, EngineError> {
        let cutoff = match chrono::Duration::from_std(retention)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
        {
            Some(cutoff) => cutoff,
            // Retention longer than representable time: nothing expires.
            None => return Ok(0),
        };
        let mut removed = 0;
        for status in [
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Aborted,
        ] {
            for session in self.store.sessions_by_status(status).await? {
                if session.updated_at < cutoff {
                    match self.store.delete_session(&session.session_id).await {
                        Ok(()) => {
                            info!(session = %session.session_id, status = %status, "expired session removed");
                            removed += 1;
                        }
                        Err(StoreError::SessionNotFound(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        Ok(removed)
    }
}
