//! Status surface published by the orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{QueueCounts, SyncMetadata};

/// Orchestrator lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Pulling,
    Pushing,
    Error,
    Offline,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pulling => "pulling",
            Self::Pushing => "pushing",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }

    pub const fn is_running(self) -> bool {
        matches!(self, Self::Pulling | Self::Pushing)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot handed to status observers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Latest successful pull or push (Unix ms)
    pub last_sync: Option<i64>,
    pub last_error: Option<String>,
    /// Records never attempted yet
    pub pending: usize,
    /// Records in `error`, whatever their class
    pub errors: usize,
    pub is_online: bool,
    /// The server rejected the current token; a new one is required
    pub needs_reauth: bool,
    /// The running or latest cycle followed a long offline period
    pub full_resync: bool,
}

impl SyncStatus {
    pub(crate) fn compose(
        state: SyncState,
        metadata: &SyncMetadata,
        counts: &QueueCounts,
        flags: StatusFlags,
    ) -> Self {
        Self {
            state,
            last_sync: metadata.last_sync_at(),
            last_error: metadata.last_error.clone(),
            pending: counts.pending,
            errors: counts.errors(),
            is_online: flags.is_online,
            needs_reauth: flags.needs_reauth,
            full_resync: flags.full_resync,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StatusFlags {
    pub is_online: bool,
    pub needs_reauth: bool,
    pub full_resync: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_uses_latest_timestamp_and_error_total() {
        let metadata = SyncMetadata {
            last_pull_at: Some(10),
            last_push_at: Some(20),
            last_error: Some("pull failed".to_string()),
            ..SyncMetadata::default()
        };
        let counts = QueueCounts {
            pending: 2,
            retriable: 1,
            auth_blocked: 1,
            definitive: 3,
            synced: 9,
        };

        let status = SyncStatus::compose(
            SyncState::Idle,
            &metadata,
            &counts,
            StatusFlags {
                is_online: true,
                ..StatusFlags::default()
            },
        );

        assert_eq!(status.last_sync, Some(20));
        assert_eq!(status.pending, 2);
        assert_eq!(status.errors, counts.errors());
        assert!(status.is_online);
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SyncState::Pushing).unwrap(), "\"pushing\"");
        assert!(SyncState::Pulling.is_running());
        assert!(!SyncState::Offline.is_running());
    }
}
