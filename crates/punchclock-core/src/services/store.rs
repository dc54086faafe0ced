//! Durable queue and cache store shared by the capture subsystem and the
//! sync engine.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;

use crate::db::{
    Database, MetadataRepository, QueueRepository, SnapshotRepository, SqliteMetadataRepository,
    SqliteQueueRepository, SqliteSnapshotRepository,
};
use crate::models::{
    FailureClass, LocalId, NewEvent, QueueCounts, QueuedEvent, ReferenceEntry, ReferenceKind,
    SyncMetadata, SyncStatus,
};
use crate::{Error, Result};

/// Thread-safe handle to the terminal's single local database.
///
/// Every operation takes the connection lock for its whole duration, so each
/// call is atomic and serialized against every other caller in the process.
/// Nothing here touches the network.
#[derive(Clone)]
pub struct SyncStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl SyncStore {
    /// Open the store at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        tracing::debug!("Opened sync store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn with_db<T>(&self, operation: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let db = self
            .db
            .lock()
            .map_err(|_| Error::Database("store lock poisoned".to_string()))?;
        operation(&db)
    }

    /// Append a captured event. Works with zero connectivity.
    pub fn enqueue(&self, event: &NewEvent) -> Result<QueuedEvent> {
        let queued =
            self.with_db(|db| SqliteQueueRepository::new(db.connection()).enqueue(event))?;
        tracing::debug!(
            "Queued {} event {} for employee {}",
            queued.event_type.as_str(),
            queued.local_id,
            queued.employee_ref
        );
        Ok(queued)
    }

    /// Oldest records eligible for upload.
    pub fn list_pending(&self, limit: usize) -> Result<Vec<QueuedEvent>> {
        self.with_db(|db| SqliteQueueRepository::new(db.connection()).list_pending(limit))
    }

    pub fn get_event(&self, id: LocalId) -> Result<Option<QueuedEvent>> {
        self.with_db(|db| SqliteQueueRepository::new(db.connection()).get(id))
    }

    pub fn list_events(&self, status: Option<SyncStatus>, limit: usize) -> Result<Vec<QueuedEvent>> {
        self.with_db(|db| SqliteQueueRepository::new(db.connection()).list(status, limit))
    }

    /// Record server acceptance. A second call for the same record is a no-op.
    pub fn mark_synced(&self, id: LocalId, server_id: &str) -> Result<bool> {
        self.with_db(|db| SqliteQueueRepository::new(db.connection()).mark_synced(id, server_id))
    }

    /// Record a failed attempt. Repeating the same outcome is a no-op.
    pub fn mark_error(&self, id: LocalId, message: &str, class: FailureClass) -> Result<bool> {
        self.with_db(|db| {
            SqliteQueueRepository::new(db.connection()).mark_error(id, message, class)
        })
    }

    pub fn record_retries(&self, ids: &[LocalId]) -> Result<()> {
        self.with_db(|db| SqliteQueueRepository::new(db.connection()).record_retries(ids))
    }

    pub fn release_auth_blocked(&self) -> Result<usize> {
        self.with_db(|db| SqliteQueueRepository::new(db.connection()).release_auth_blocked())
    }

    pub fn reset_for_retry(&self, id: LocalId) -> Result<bool> {
        self.with_db(|db| SqliteQueueRepository::new(db.connection()).reset_for_retry(id))
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        self.with_db(|db| SqliteQueueRepository::new(db.connection()).counts())
    }

    /// Replace cached reference rows of one kind, keyed by server ID.
    pub fn upsert_snapshot(&self, kind: ReferenceKind, entries: &[ReferenceEntry]) -> Result<usize> {
        self.with_db(|db| SqliteSnapshotRepository::new(db.connection()).upsert(kind, entries))
    }

    pub fn read_snapshot(&self, kind: ReferenceKind, limit: usize) -> Result<Vec<ReferenceEntry>> {
        self.with_db(|db| SqliteSnapshotRepository::new(db.connection()).list(kind, limit))
    }

    /// Decode every cached row of a kind into a typed structure.
    pub fn read_snapshot_as<T: DeserializeOwned>(&self, kind: ReferenceKind) -> Result<Vec<T>> {
        let entries = self.with_db(|db| {
            let repo = SqliteSnapshotRepository::new(db.connection());
            repo.list(kind, repo.count(kind)?)
        })?;
        entries
            .iter()
            .map(|entry| entry.decode().map_err(Error::from))
            .collect()
    }

    pub fn snapshot_count(&self, kind: ReferenceKind) -> Result<usize> {
        self.with_db(|db| SqliteSnapshotRepository::new(db.connection()).count(kind))
    }

    pub fn read_metadata(&self) -> Result<SyncMetadata> {
        self.with_db(|db| SqliteMetadataRepository::new(db.connection()).load())
    }

    pub fn write_metadata(&self, metadata: &SyncMetadata) -> Result<()> {
        self.with_db(|db| SqliteMetadataRepository::new(db.connection()).save(metadata))
    }

    /// Read-modify-write the bookkeeping row under a single lock.
    pub fn update_metadata(
        &self,
        update: impl FnOnce(&mut SyncMetadata),
    ) -> Result<SyncMetadata> {
        self.with_db(|db| {
            let repo = SqliteMetadataRepository::new(db.connection());
            let mut metadata = repo.load()?;
            update(&mut metadata);
            repo.save(&metadata)?;
            Ok(metadata)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn enqueue_is_visible_without_any_sync() {
        let store = SyncStore::open_in_memory().unwrap();
        assert_eq!(store.path(), None);
        let metadata = store.read_metadata().unwrap();
        assert!(!metadata.is_online);
        assert_eq!(metadata.last_push_at, None);

        let queued = store
            .enqueue(&NewEvent::new(5, EventType::Entry, "kiosk-1"))
            .unwrap();

        let pending = store.list_pending(50).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_id, queued.local_id);
    }

    #[test]
    fn queue_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("terminal.db");

        let key = {
            let store = SyncStore::open_path(&path).unwrap();
            store
                .enqueue(&NewEvent::new(5, EventType::Exit, "kiosk-1"))
                .unwrap()
                .idempotency_key
        };

        let reopened = SyncStore::open_path(&path).unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        let pending = reopened.list_pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].idempotency_key, key);
    }

    #[test]
    fn update_metadata_applies_closure() {
        let store = SyncStore::open_in_memory().unwrap();
        let updated = store
            .update_metadata(|metadata| {
                metadata.is_online = true;
                metadata.last_error = Some("boom".to_string());
            })
            .unwrap();

        assert_eq!(store.read_metadata().unwrap(), updated);
    }

    #[test]
    fn read_snapshot_as_decodes_typed_rows() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Department {
            id: i64,
            nombre: String,
        }

        let store = SyncStore::open_in_memory().unwrap();
        let entries = [json!({"id": 1, "nombre": "Ventas"}), json!({"id": 2, "nombre": "TI"})]
            .into_iter()
            .filter_map(|row| ReferenceEntry::from_row(ReferenceKind::Department, row, 1))
            .collect::<Vec<_>>();
        store
            .upsert_snapshot(ReferenceKind::Department, &entries)
            .unwrap();

        let departments: Vec<Department> =
            store.read_snapshot_as(ReferenceKind::Department).unwrap();
        assert_eq!(
            departments,
            vec![
                Department {
                    id: 1,
                    nombre: "Ventas".to_string()
                },
                Department {
                    id: 2,
                    nombre: "TI".to_string()
                },
            ]
        );
    }
}
