//! Attendance event queue repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{
    FailureClass, IdempotencyKey, LocalId, NewEvent, QueueCounts, QueuedEvent, SyncStatus,
};
use rusqlite::{params, Connection, OptionalExtension};

const EVENT_COLUMNS: &str = "local_id, idempotency_key, employee_ref, event_type, classification,
    department_ref, capture_method, origin_device, attendance_state, location, captured_at,
    sync_status, server_id, last_error, is_definitive_error, auth_blocked, retry_count,
    created_at, updated_at";

/// Trait for event queue storage operations
///
/// Rows are never deleted; every transition only rewrites status fields.
pub trait QueueRepository {
    /// Append a captured event as `pending`
    fn enqueue(&self, event: &NewEvent) -> Result<QueuedEvent>;

    /// Get a queued event by local ID
    fn get(&self, id: LocalId) -> Result<Option<QueuedEvent>>;

    /// Oldest records a push cycle should submit
    fn list_pending(&self, limit: usize) -> Result<Vec<QueuedEvent>>;

    /// List records newest first, optionally filtered by status
    fn list(&self, status: Option<SyncStatus>, limit: usize) -> Result<Vec<QueuedEvent>>;

    /// Record server acceptance; returns `false` when the row was already synced
    fn mark_synced(&self, id: LocalId, server_id: &str) -> Result<bool>;

    /// Record a failed attempt; returns `false` when nothing changed
    fn mark_error(&self, id: LocalId, message: &str, class: FailureClass) -> Result<bool>;

    /// Count a resubmission for records currently in `error`
    fn record_retries(&self, ids: &[LocalId]) -> Result<()>;

    /// Make auth-blocked records eligible again
    fn release_auth_blocked(&self) -> Result<usize>;

    /// Operator reset of a failed record back to `pending`
    fn reset_for_retry(&self, id: LocalId) -> Result<bool>;

    /// Live counters per status class
    fn counts(&self) -> Result<QueueCounts>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn exists(&self, id: LocalId) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM queued_events WHERE local_id = ?)",
            params![id.get()],
            |row| row.get(0),
        )?)
    }

    fn ensure_exists(&self, id: LocalId) -> Result<()> {
        if self.exists(id)? {
            Ok(())
        } else {
            Err(Error::NotFound(id.to_string()))
        }
    }

    /// Parse a queued event from a database row
    fn parse_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedEvent> {
        let event_type: String = row.get(3)?;
        let sync_status: String = row.get(11)?;
        Ok(QueuedEvent {
            local_id: LocalId::new(row.get(0)?),
            idempotency_key: IdempotencyKey::from(row.get::<_, String>(1)?),
            employee_ref: row.get(2)?,
            event_type: event_type
                .parse()
                .map_err(|error: String| invalid_column(3, error))?,
            classification: row.get(4)?,
            department_ref: row.get(5)?,
            capture_method: row.get(6)?,
            origin_device: row.get(7)?,
            attendance_state: row.get(8)?,
            location: row.get(9)?,
            captured_at: row.get(10)?,
            sync_status: sync_status
                .parse()
                .map_err(|error: String| invalid_column(11, error))?,
            server_id: row.get(12)?,
            last_error: row.get(13)?,
            is_definitive_error: row.get::<_, i32>(14)? != 0,
            auth_blocked: row.get::<_, i32>(15)? != 0,
            retry_count: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(Error::Database(message)),
    )
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn enqueue(&self, event: &NewEvent) -> Result<QueuedEvent> {
        if event.origin_device.trim().is_empty() {
            return Err(Error::InvalidInput("origin device must not be empty".into()));
        }

        let key = IdempotencyKey::generate();
        let now = now_ms();
        self.conn.execute(
            "INSERT INTO queued_events (
                idempotency_key, employee_ref, event_type, classification, department_ref,
                capture_method, origin_device, attendance_state, location, captured_at,
                sync_status, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
            params![
                key.as_str(),
                event.employee_ref,
                event.event_type.as_str(),
                event.classification,
                event.department_ref,
                event.capture_method,
                event.origin_device,
                event.attendance_state,
                event.location,
                event.captured_at,
                now,
                now
            ],
        )?;

        let id = LocalId::new(self.conn.last_insert_rowid());
        self.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn get(&self, id: LocalId) -> Result<Option<QueuedEvent>> {
        let event = self
            .conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM queued_events WHERE local_id = ?"),
                params![id.get()],
                Self::parse_event,
            )
            .optional()?;
        Ok(event)
    }

    fn list_pending(&self, limit: usize) -> Result<Vec<QueuedEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS}
             FROM queued_events
             WHERE sync_status = 'pending'
                OR (sync_status = 'error' AND is_definitive_error = 0 AND auth_blocked = 0)
             ORDER BY local_id ASC
             LIMIT ?"
        ))?;

        let events = stmt
            .query_map(params![limit as i64], Self::parse_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn list(&self, status: Option<SyncStatus>, limit: usize) -> Result<Vec<QueuedEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS}
             FROM queued_events
             WHERE ?1 IS NULL OR sync_status = ?1
             ORDER BY local_id DESC
             LIMIT ?2"
        ))?;

        let events = stmt
            .query_map(
                params![status.map(SyncStatus::as_str), limit as i64],
                Self::parse_event,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn mark_synced(&self, id: LocalId, server_id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE queued_events
             SET sync_status = 'synced', server_id = ?2, last_error = NULL,
                 is_definitive_error = 0, auth_blocked = 0, updated_at = ?3
             WHERE local_id = ?1 AND sync_status != 'synced'",
            params![id.get(), server_id, now_ms()],
        )?;

        if rows == 0 {
            self.ensure_exists(id)?;
            return Ok(false);
        }
        Ok(true)
    }

    fn mark_error(&self, id: LocalId, message: &str, class: FailureClass) -> Result<bool> {
        let definitive = i32::from(class.is_definitive());
        let auth_blocked = i32::from(class.is_auth_blocked());
        let rows = self.conn.execute(
            "UPDATE queued_events
             SET sync_status = 'error', last_error = ?2, is_definitive_error = ?3,
                 auth_blocked = ?4, updated_at = ?5
             WHERE local_id = ?1
               AND sync_status != 'synced'
               AND NOT (sync_status = 'error' AND last_error IS ?2
                        AND is_definitive_error = ?3 AND auth_blocked = ?4)",
            params![id.get(), message, definitive, auth_blocked, now_ms()],
        )?;

        if rows == 0 {
            self.ensure_exists(id)?;
            return Ok(false);
        }
        Ok(true)
    }

    fn record_retries(&self, ids: &[LocalId]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE queued_events SET retry_count = retry_count + 1
                 WHERE local_id = ? AND sync_status = 'error'",
            )?;
            for id in ids {
                stmt.execute(params![id.get()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn release_auth_blocked(&self) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE queued_events SET auth_blocked = 0, updated_at = ?
             WHERE sync_status = 'error' AND auth_blocked = 1",
            params![now_ms()],
        )?;
        Ok(rows)
    }

    fn reset_for_retry(&self, id: LocalId) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE queued_events
             SET sync_status = 'pending', is_definitive_error = 0, auth_blocked = 0, updated_at = ?2
             WHERE local_id = ?1 AND sync_status = 'error'",
            params![id.get(), now_ms()],
        )?;

        if rows == 0 {
            self.ensure_exists(id)?;
            return Ok(false);
        }
        Ok(true)
    }

    fn counts(&self) -> Result<QueueCounts> {
        let counts = self.conn.query_row(
            "SELECT
                COALESCE(SUM(sync_status = 'pending'), 0),
                COALESCE(SUM(sync_status = 'error' AND is_definitive_error = 0 AND auth_blocked = 0), 0),
                COALESCE(SUM(sync_status = 'error' AND is_definitive_error = 0 AND auth_blocked = 1), 0),
                COALESCE(SUM(sync_status = 'error' AND is_definitive_error = 1), 0),
                COALESCE(SUM(sync_status = 'synced'), 0)
             FROM queued_events",
            [],
            |row| {
                Ok(QueueCounts {
                    pending: row.get(0)?,
                    retriable: row.get(1)?,
                    auth_blocked: row.get(2)?,
                    definitive: row.get(3)?,
                    synced: row.get(4)?,
                })
            },
        )?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::EventType;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn event(employee: i64) -> NewEvent {
        NewEvent::new(employee, EventType::Entry, "kiosk-1")
    }

    #[test]
    fn test_enqueue_assigns_increasing_ids_and_keys() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let first = repo.enqueue(&event(1)).unwrap();
        let second = repo.enqueue(&event(2)).unwrap();

        assert!(second.local_id > first.local_id);
        assert_ne!(first.idempotency_key, second.idempotency_key);
        assert_eq!(first.sync_status, SyncStatus::Pending);
        assert_eq!(first.retry_count, 0);
    }

    #[test]
    fn test_enqueue_rejects_missing_device() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let error = repo
            .enqueue(&NewEvent::new(1, EventType::Exit, "  "))
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[test]
    fn test_list_pending_oldest_first_with_limit() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let ids: Vec<_> = (1..=4)
            .map(|employee| repo.enqueue(&event(employee)).unwrap().local_id)
            .collect();

        let pending = repo.list_pending(3).unwrap();
        let pending_ids: Vec<_> = pending.iter().map(|event| event.local_id).collect();
        assert_eq!(pending_ids, ids[..3].to_vec());
    }

    #[test]
    fn test_mark_synced_is_idempotent() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let queued = repo.enqueue(&event(1)).unwrap();

        assert!(repo.mark_synced(queued.local_id, "900").unwrap());
        let after_first = repo.get(queued.local_id).unwrap().unwrap();

        assert!(!repo.mark_synced(queued.local_id, "901").unwrap());
        let after_second = repo.get(queued.local_id).unwrap().unwrap();

        assert_eq!(after_first, after_second);
        assert_eq!(after_second.server_id.as_deref(), Some("900"));
    }

    #[test]
    fn test_synced_record_ignores_errors() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let queued = repo.enqueue(&event(1)).unwrap();
        repo.mark_synced(queued.local_id, "77").unwrap();

        assert!(!repo
            .mark_error(queued.local_id, "late failure", FailureClass::Definitive)
            .unwrap());
        assert!(!repo.reset_for_retry(queued.local_id).unwrap());

        let stored = repo.get(queued.local_id).unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(stored.last_error, None);
    }

    #[test]
    fn test_mark_error_same_outcome_is_noop() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let queued = repo.enqueue(&event(1)).unwrap();

        assert!(repo
            .mark_error(queued.local_id, "timeout", FailureClass::Retriable)
            .unwrap());
        assert!(!repo
            .mark_error(queued.local_id, "timeout", FailureClass::Retriable)
            .unwrap());
        assert!(repo
            .mark_error(queued.local_id, "bad data", FailureClass::Definitive)
            .unwrap());
    }

    #[test]
    fn test_mark_unknown_record_is_not_found() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let error = repo.mark_synced(LocalId::new(42), "1").unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[test]
    fn test_definitive_and_auth_errors_leave_pending_list() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let retriable = repo.enqueue(&event(1)).unwrap();
        let definitive = repo.enqueue(&event(2)).unwrap();
        let auth = repo.enqueue(&event(3)).unwrap();

        repo.mark_error(retriable.local_id, "503", FailureClass::Retriable)
            .unwrap();
        repo.mark_error(definitive.local_id, "CAMPOS_FALTANTES", FailureClass::Definitive)
            .unwrap();
        repo.mark_error(auth.local_id, "401", FailureClass::AuthRequired)
            .unwrap();

        let pending: Vec<_> = repo
            .list_pending(10)
            .unwrap()
            .into_iter()
            .map(|event| event.local_id)
            .collect();
        assert_eq!(pending, vec![retriable.local_id]);

        let counts = repo.counts().unwrap();
        assert_eq!(
            counts,
            QueueCounts {
                pending: 0,
                retriable: 1,
                auth_blocked: 1,
                definitive: 1,
                synced: 0,
            }
        );
        assert_eq!(counts.errors(), 3);

        assert_eq!(repo.release_auth_blocked().unwrap(), 1);
        assert_eq!(repo.list_pending(10).unwrap().len(), 2);
    }

    #[test]
    fn test_record_retries_counts_only_failed_records() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let fresh = repo.enqueue(&event(1)).unwrap();
        let failed = repo.enqueue(&event(2)).unwrap();
        repo.mark_error(failed.local_id, "timeout", FailureClass::Retriable)
            .unwrap();

        repo.record_retries(&[fresh.local_id, failed.local_id])
            .unwrap();

        assert_eq!(repo.get(fresh.local_id).unwrap().unwrap().retry_count, 0);
        assert_eq!(repo.get(failed.local_id).unwrap().unwrap().retry_count, 1);
    }

    #[test]
    fn test_reset_for_retry_clears_definitive_flag() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let queued = repo.enqueue(&event(1)).unwrap();
        repo.mark_error(queued.local_id, "EMPLEADO_NO_ENCONTRADO", FailureClass::Definitive)
            .unwrap();

        assert!(repo.reset_for_retry(queued.local_id).unwrap());
        let stored = repo.get(queued.local_id).unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert!(!stored.is_definitive_error);
        assert_eq!(stored.last_error.as_deref(), Some("EMPLEADO_NO_ENCONTRADO"));
    }

    #[test]
    fn test_list_filters_by_status() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let a = repo.enqueue(&event(1)).unwrap();
        let b = repo.enqueue(&event(2)).unwrap();
        repo.mark_synced(a.local_id, "1").unwrap();

        let synced = repo.list(Some(SyncStatus::Synced), 10).unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].local_id, a.local_id);

        let all = repo.list(None, 10).unwrap();
        assert_eq!(all[0].local_id, b.local_id);
        assert_eq!(all.len(), 2);
    }
}
