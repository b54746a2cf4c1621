//! Shared record shape and transition logic for the store implementations.

use chrono::Utc;
use chunklift_model::{PartStatus, SessionStatus, UploadPart, UploadSession};
use serde::{Deserialize, Serialize};

use crate::{PartUpdate, StoreError};

/// One session and its parts, as held in memory and serialized to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SessionRecord {
    pub session: UploadSession,
    pub parts: Vec<UploadPart>,
}

impl SessionRecord {
    pub fn new(session: UploadSession) -> Self {
        Self {
            session,
            parts: Vec::new(),
        }
    }

    /// Applies a CAS status transition to the session.
    pub fn transition(
        &mut self,
        expected: &[SessionStatus],
        to: SessionStatus,
    ) -> Result<(), StoreError> {
        if !expected.contains(&self.session.status) {
            return Err(StoreError::InvalidSessionTransition {
                session_id: self.session.session_id.clone(),
                actual: self.session.status,
                expected: expected
                    .iter()
                    .map(SessionStatus::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        self.session.status = to;
        self.session.updated_at = Utc::now();
        Ok(())
    }

    /// Applies a [`PartUpdate`] to one part, enforcing the closed transition
    /// set and the token invariant.
    pub fn apply_part_update(
        &mut self,
        part_number: u32,
        update: &PartUpdate,
    ) -> Result<UploadPart, StoreError> {
        let session_id = self.session.session_id.clone();
        let part = self
            .parts
            .iter_mut()
            .find(|p| p.part_number == part_number)
            .ok_or_else(|| StoreError::PartNotFound {
                session_id: session_id.clone(),
                part_number,
            })?;

        let invalid = |part: &UploadPart| StoreError::InvalidPartTransition {
            session_id: session_id.clone(),
            part_number,
            actual: part.status.as_str().to_string(),
            update: update.name().to_string(),
        };

        match update {
            PartUpdate::Launch => {
                if part.status != PartStatus::Pending {
                    return Err(invalid(part));
                }
                part.status = PartStatus::Uploading;
                part.last_attempt_at = Some(Utc::now());
            }
            PartUpdate::Uploaded { integrity_token } => {
                if part.status != PartStatus::Uploading {
                    return Err(invalid(part));
                }
                part.status = PartStatus::Uploaded;
                part.integrity_token = Some(integrity_token.clone());
            }
            PartUpdate::RetryableFailure => {
                if !matches!(part.status, PartStatus::Uploading | PartStatus::Pending) {
                    return Err(invalid(part));
                }
                part.status = PartStatus::Pending;
                part.integrity_token = None;
                part.retry_count += 1;
            }
            PartUpdate::ExhaustedFailure => {
                if part.status == PartStatus::Uploaded {
                    return Err(invalid(part));
                }
                part.status = PartStatus::Failed;
                part.integrity_token = None;
                part.retry_count += 1;
            }
            PartUpdate::Reset => {
                if part.status != PartStatus::Uploading {
                    return Err(invalid(part));
                }
                part.status = PartStatus::Pending;
                part.integrity_token = None;
            }
        }

        self.session.updated_at = Utc::now();
        Ok(part.clone())
    }
}
