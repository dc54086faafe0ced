//! punchclock-core - Core library for Punchclock
//!
//! This crate contains the offline-first synchronization engine that runs on
//! an attendance-capture terminal: the durable event queue and reference
//! cache, the pull/push components, and the sync orchestrator.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use models::{EventType, LocalId, NewEvent, QueuedEvent, ReferenceKind, SyncMetadata};
pub use services::SyncStore;
pub use sync::{SyncOrchestrator, SyncOutcome, SyncReason, SyncState, SyncStatus};
