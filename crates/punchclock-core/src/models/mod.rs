//! Data models for Punchclock

mod event;
mod metadata;
mod reference;

pub use event::{
    EventType, FailureClass, IdempotencyKey, LocalId, NewEvent, QueueCounts, QueuedEvent,
    SyncStatus,
};
pub use metadata::SyncMetadata;
pub use reference::{ReferenceEntry, ReferenceKind};
