//! File-backed store: one JSON document per session in a directory.
//!
//! Writes go to a temp file in the same directory followed by an atomic
//! rename, so a crash never leaves a half-written record. The full record
//! set is loaded into memory at startup; mutations write through.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use chunklift_model::{SessionStatus, UploadPart, UploadSession};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{PartUpdate, SessionRecord, SessionStore, StoreError};

/// Durable JSON-per-session store rooted at a directory.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl JsonFileStore {
    /// Opens (creating if needed) the store directory and loads every
    /// session document found in it.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut records = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let record = load_record(&path)?;
            records.insert(record.session.session_id.clone(), record);
        }
        debug!(sessions = records.len(), dir = %dir.display(), "loaded session store");

        Ok(Self {
            dir,
            records: RwLock::new(records),
        })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    /// Serializes one record to its document via temp file + rename.
    fn persist(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let path = self.session_path(&record.session.session_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_document(&self, session_id: &str) -> Result<(), StoreError> {
        let path = self.session_path(session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Loads and validates a single session document.
fn load_record(path: &Path) -> Result<SessionRecord, StoreError> {
    let data = std::fs::read_to_string(path)?;
    let record: SessionRecord = serde_json::from_str(&data).map_err(|e| {
        // Unknown status codes land here: refuse the record instead of
        // guessing a state.
        StoreError::Corrupt(format!("{}: {e}", path.display()))
    })?;
    let mut parts = record.parts;
    parts.sort_by_key(|p| p.part_number);
    for (i, part) in parts.iter().enumerate() {
        if part.part_number != (i + 1) as u32 {
            return Err(StoreError::Corrupt(format!(
                "{}: part numbers have gaps or duplicates",
                path.display()
            )));
        }
    }
    Ok(SessionRecord {
        session: record.session,
        parts,
    })
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn create_session(&self, session: &UploadSession) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&session.session_id) {
            return Err(StoreError::SessionExists(session.session_id.clone()));
        }
        let record = SessionRecord::new(session.clone());
        self.persist(&record)?;
        records.insert(session.session_id.clone(), record);
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
        self.persist(record)
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
        self.persist(record)?;
        Ok(record.session.clone())
    }

    async fn set_session_error(&self, session_id: &str, error: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        record.session.error_message = Some(error.to_string());
        record.session.updated_at = Utc::now();
        self.persist(record)
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
        self.persist(record)
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
        let part = record.apply_part_update(part_number, &update)?;
        self.persist(record)?;
        Ok(part)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.remove(session_id).is_some() {
            if let Err(e) = self.remove_document(session_id) {
                warn!(session = %session_id, error = %e, "failed to remove session document");
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{run_store_suite, test_parts, test_session};

    #[tokio::test]
    async fn json_store_conformance() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path()).unwrap();
        run_store_suite(&store).await;
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStore::open(tmp.path()).unwrap();
            store
                .create_session(&test_session("s1", SessionStatus::InProgress))
                .await
                .unwrap();
            store
                .create_parts("s1", &test_parts("s1", 5))
                .await
                .unwrap();
            store
                .update_part("s1", 1, PartUpdate::Launch)
                .await
                .unwrap();
            store
                .update_part(
                    "s1",
                    1,
                    PartUpdate::Uploaded {
                        integrity_token: "etag-1".into(),
                    },
                )
                .await
                .unwrap();
        }

        let store = JsonFileStore::open(tmp.path()).unwrap();
        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::InProgress);
        let parts = store.get_parts("s1").await.unwrap();
        assert_eq!(parts[0].integrity_token.as_deref(), Some("etag-1"));
        assert_eq!(
            parts
                .iter()
                .filter(|p| p.status == chunklift_model::PartStatus::Uploaded)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_status_code_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStore::open(tmp.path()).unwrap();
            store
                .create_session(&test_session("s1", SessionStatus::Pending))
                .await
                .unwrap();
        }
        let path = tmp.path().join("s1.json");
        let doc = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, doc.replace("\"pending\"", "\"warp_drive\"")).unwrap();

        let err = JsonFileStore::open(tmp.path()).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path()).unwrap();
        store
            .create_session(&test_session("s1", SessionStatus::Completed))
            .await
            .unwrap();
        assert!(tmp.path().join("s1.json").exists());
        store.delete_session("s1").await.unwrap();
        assert!(!tmp.path().join("s1.json").exists());
    }
}
