//! Database layer for Punchclock

mod connection;
mod metadata_repository;
mod migrations;
mod queue_repository;
mod snapshot_repository;

pub use connection::Database;
pub use metadata_repository::{MetadataRepository, SqliteMetadataRepository};
pub use queue_repository::{QueueRepository, SqliteQueueRepository};
pub use snapshot_repository::{SnapshotRepository, SqliteSnapshotRepository};
