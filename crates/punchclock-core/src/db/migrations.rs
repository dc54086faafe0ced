//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Migration to version 1: event queue, reference cache, sync bookkeeping
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS queued_events (
            local_id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_key TEXT NOT NULL UNIQUE,
            employee_ref INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            classification TEXT NOT NULL,
            department_ref INTEGER,
            capture_method TEXT NOT NULL,
            origin_device TEXT NOT NULL,
            attendance_state TEXT,
            location TEXT,
            captured_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            server_id TEXT,
            last_error TEXT,
            is_definitive_error INTEGER NOT NULL DEFAULT 0,
            auth_blocked INTEGER NOT NULL DEFAULT 0,
            retry_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_queued_events_status ON queued_events(sync_status, local_id);
        CREATE TABLE IF NOT EXISTS reference_snapshot (
            kind TEXT NOT NULL,
            server_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            PRIMARY KEY (kind, server_id)
        );
        CREATE TABLE IF NOT EXISTS sync_metadata (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_pull_at INTEGER,
            last_push_at INTEGER,
            last_error TEXT,
            is_online INTEGER NOT NULL DEFAULT 0,
            offline_since INTEGER
        );
        INSERT OR IGNORE INTO sync_metadata (id) VALUES (1);
        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )
    .inspect_err(|_| {
        conn.execute_batch("ROLLBACK").ok();
    })?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: synced rows can no longer change
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TRIGGER IF NOT EXISTS queued_events_synced_guard BEFORE UPDATE ON queued_events
        FOR EACH ROW
        WHEN OLD.sync_status = 'synced'
        BEGIN
            SELECT RAISE(IGNORE);
        END;
        CREATE TRIGGER IF NOT EXISTS queued_events_no_delete BEFORE DELETE ON queued_events
        BEGIN
            SELECT RAISE(ABORT, 'queued events are never deleted');
        END;
        INSERT INTO schema_version (version) VALUES (2);
        COMMIT;",
    )
    .inspect_err(|_| {
        conn.execute_batch("ROLLBACK").ok();
    })?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
