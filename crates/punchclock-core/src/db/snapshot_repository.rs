//! Reference snapshot repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{ReferenceEntry, ReferenceKind};
use rusqlite::{params, Connection};

/// Trait for reference cache storage operations
pub trait SnapshotRepository {
    /// Insert or overwrite entries keyed by `(kind, server_id)`
    fn upsert(&self, kind: ReferenceKind, entries: &[ReferenceEntry]) -> Result<usize>;

    /// List cached entries of a kind ordered by server ID
    fn list(&self, kind: ReferenceKind, limit: usize) -> Result<Vec<ReferenceEntry>>;

    /// Number of cached entries of a kind
    fn count(&self, kind: ReferenceKind) -> Result<usize>;
}

/// `SQLite` implementation of `SnapshotRepository`
pub struct SqliteSnapshotRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSnapshotRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SnapshotRepository for SqliteSnapshotRepository<'_> {
    fn upsert(&self, kind: ReferenceKind, entries: &[ReferenceEntry]) -> Result<usize> {
        if let Some(entry) = entries.iter().find(|entry| entry.kind != kind) {
            return Err(Error::InvalidInput(format!(
                "entry {} is a {} row, expected {kind}",
                entry.server_id, entry.kind
            )));
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO reference_snapshot (kind, server_id, payload, fetched_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(kind, server_id) DO UPDATE SET
                    payload = excluded.payload,
                    fetched_at = excluded.fetched_at",
            )?;
            for entry in entries {
                stmt.execute(params![
                    kind.as_str(),
                    entry.server_id,
                    serde_json::to_string(&entry.payload)?,
                    entry.fetched_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    fn list(&self, kind: ReferenceKind, limit: usize) -> Result<Vec<ReferenceEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT server_id, payload, fetched_at
             FROM reference_snapshot
             WHERE kind = ?
             ORDER BY CAST(server_id AS INTEGER), server_id
             LIMIT ?",
        )?;

        let rows = stmt
            .query_map(params![kind.as_str(), limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(server_id, payload, fetched_at)| -> Result<ReferenceEntry> {
                Ok(ReferenceEntry {
                    kind,
                    server_id,
                    payload: serde_json::from_str(&payload)?,
                    fetched_at,
                })
            })
            .collect()
    }

    fn count(&self, kind: ReferenceKind) -> Result<usize> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM reference_snapshot WHERE kind = ?",
            params![kind.as_str()],
            |row| row.get(0),
        )?)
    }
}
