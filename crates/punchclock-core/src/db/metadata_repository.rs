//! Sync metadata repository

use crate::error::Result;
use crate::models::SyncMetadata;
use rusqlite::{params, Connection};

/// Trait for the singleton sync bookkeeping row
pub trait MetadataRepository {
    /// Load the bookkeeping row
    fn load(&self) -> Result<SyncMetadata>;

    /// Overwrite the bookkeeping row
    fn save(&self, metadata: &SyncMetadata) -> Result<()>;
}

/// `SQLite` implementation of `MetadataRepository`
pub struct SqliteMetadataRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMetadataRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MetadataRepository for SqliteMetadataRepository<'_> {
    fn load(&self) -> Result<SyncMetadata> {
        let metadata = self.conn.query_row(
            "SELECT last_pull_at, last_push_at, last_error, is_online, offline_since
             FROM sync_metadata WHERE id = 1",
            [],
            |row| {
                Ok(SyncMetadata {
                    last_pull_at: row.get(0)?,
                    last_push_at: row.get(1)?,
                    last_error: row.get(2)?,
                    is_online: row.get::<_, i32>(3)? != 0,
                    offline_since: row.get(4)?,
                })
            },
        )?;
        Ok(metadata)
    }

    fn save(&self, metadata: &SyncMetadata) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_metadata (id, last_pull_at, last_push_at, last_error, is_online, offline_since)
             VALUES (1, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                last_pull_at = excluded.last_pull_at,
                last_push_at = excluded.last_push_at,
                last_error = excluded.last_error,
                is_online = excluded.is_online,
                offline_since = excluded.offline_since",
            params![
                metadata.last_pull_at,
                metadata.last_push_at,
                metadata.last_error,
                i32::from(metadata.is_online),
                metadata.offline_since
            ],
        )?;
        Ok(())
    }
}
