//! Sync bookkeeping model

use serde::{Deserialize, Serialize};

/// Singleton sync bookkeeping row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Last pull in which at least one kind refreshed (Unix ms)
    pub last_pull_at: Option<i64>,
    /// Last push that reached the server (Unix ms)
    pub last_push_at: Option<i64>,
    /// Most recent sync failure, cleared by a clean cycle
    pub last_error: Option<String>,
    /// Last reported connectivity
    pub is_online: bool,
    /// When the terminal last went offline (Unix ms)
    pub offline_since: Option<i64>,
}

impl SyncMetadata {
    /// Most recent successful contact with the server
    #[must_use]
    pub fn last_sync_at(&self) -> Option<i64> {
        match (self.last_pull_at, self.last_push_at) {
            (Some(pull), Some(push)) => Some(pull.max(push)),
            (pull, push) => pull.or(push),
        }
    }
}
