//! In-memory store for tests and ephemeral (non-durable) use.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use chunklift_model::{SessionStatus, UploadPart, UploadSession};
use tokio::sync::RwLock;

use crate::{PartUpdate, SessionRecord, SessionStore, StoreError};

/// `RwLock<HashMap>` backed store. All the transition semantics of the
/// durable stores, none of the durability.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &UploadSession) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&session.session_id) {
            return Err(StoreError::SessionExists(session.session_id.clone()));
        }
        records.insert(
            session.session_id.clone(),
            SessionRecord::new(session.clone()),
        );
        Ok(())
    }

    async fn create_parts(
        &self,
        session_id: &str,
        parts: &[UploadPart],
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        record.parts = parts.to_vec();
        record.parts.sort_by_key(|p| p.part_number);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<UploadSession>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(session_id).map(|r| r.session.clone()))
    }

    async fn get_parts(&self, session_id: &str) -> Result<Vec<UploadPart>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(session_id)
            .map(|r| r.parts.clone())
            .unwrap_or_default())
    }

    async fn sessions_by_status(
        &self,
        status: SessionStatus,
    ) -> Result<Vec<UploadSession>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.session.status == status)
            .map(|r| r.session.clone())
            .collect())
    }

    async fn transition_session(
        &self,
        session_id: &str,
        expected: &[SessionStatus],
        to: SessionStatus,
    ) -> Result<UploadSession, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        record.transition(expected, to)?;
        Ok(record.session.clone())
    }

    async fn set_session_error(&self, session_id: &str, error: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        record.session.error_message = Some(error.to_string());
        record.session.updated_at = Utc::now();
        Ok(())
    }

    async fn set_remote_upload_id(
        &self,
        session_id: &str,
        remote_upload_id: &str,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        record.session.remote_upload_id = Some(remote_upload_id.to_string());
        record.session.updated_at = Utc::now();
        Ok(())
    }

    async fn update_part(
        &self,
        session_id: &str,
        part_number: u32,
        update: PartUpdate,
    ) -> Result<UploadPart, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        record.apply_part_update(part_number, &update)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.remove(session_id);
        Ok(())
    }
}
