//! Reference data download: server snapshot into the local cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::transport::{SyncTransport, TransportError};
use crate::models::{ReferenceEntry, ReferenceKind};
use crate::services::SyncStore;
use crate::util::unix_millis_now;

#[derive(Debug, Error)]
pub enum PullError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Failed to cache snapshot: {0}")]
    Store(#[from] crate::Error),
}

/// Per-kind result of one pull pass
#[derive(Debug, Default)]
pub struct PullReport {
    pub results: BTreeMap<ReferenceKind, Result<KindRefresh, PullError>>,
}

/// What a successful refresh of one kind changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindRefresh {
    /// Rows written to the cache
    pub stored: usize,
    /// Rows dropped because they carried no usable `id`
    pub skipped: usize,
}

impl PullReport {
    pub fn any_success(&self) -> bool {
        self.results.values().any(Result::is_ok)
    }

    pub fn is_complete(&self) -> bool {
        !self.results.is_empty() && self.results.values().all(Result::is_ok)
    }

    pub fn auth_rejected(&self) -> bool {
        self.results.values().any(|result| {
            matches!(result, Err(PullError::Transport(error)) if error.is_unauthorized())
        })
    }

    pub fn stored(&self) -> usize {
        self.results
            .values()
            .filter_map(|result| result.as_ref().ok())
            .map(|refresh| refresh.stored)
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = (ReferenceKind, &PullError)> {
        self.results
            .iter()
            .filter_map(|(kind, result)| result.as_ref().err().map(|error| (*kind, error)))
    }

    /// One-line summary of the failed kinds, if any
    pub fn error_summary(&self) -> Option<String> {
        let parts: Vec<String> = self
            .failures()
            .map(|(kind, error)| format!("{kind}: {error}"))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(format!("pull failed ({})", parts.join("; ")))
        }
    }
}

/// Downloads reference data and replaces the cached snapshot kind by kind.
///
/// A failing kind never blocks the others and never wipes rows already cached.
#[derive(Clone)]
pub struct PullComponent {
    store: SyncStore,
    transport: Arc<dyn SyncTransport>,
}

impl PullComponent {
    pub fn new(store: SyncStore, transport: Arc<dyn SyncTransport>) -> Self {
        Self { store, transport }
    }

    /// Refresh every reference kind.
    pub async fn full_pull(&self, cancel: &CancellationToken) -> PullReport {
        let mut report = PullReport::default();
        for kind in ReferenceKind::ALL {
            let result = self.pull_kind(kind, cancel).await;
            match &result {
                Ok(refresh) => tracing::debug!("Pulled {} {} rows", refresh.stored, kind),
                Err(error) => tracing::warn!("Pull of {} failed: {}", kind, error),
            }
            report.results.insert(kind, result);
        }
        tracing::info!(
            "Pull finished: {} rows cached, {} kinds failed",
            report.stored(),
            report.failures().count()
        );
        report
    }

    /// Refresh a single reference kind.
    pub async fn pull_kind(
        &self,
        kind: ReferenceKind,
        cancel: &CancellationToken,
    ) -> Result<KindRefresh, PullError> {
        let rows = self.transport.fetch_reference(kind, cancel).await?;
        let fetched_at = unix_millis_now();
        let total = rows.len();
        let entries: Vec<ReferenceEntry> = rows
            .into_iter()
            .filter_map(|row| ReferenceEntry::from_row(kind, row, fetched_at))
            .collect();
        let skipped = total - entries.len();
        if skipped > 0 {
            tracing::warn!("Skipped {} {} rows without an id", skipped, kind);
        }

        let stored = self.store.upsert_snapshot(kind, &entries)?;
        Ok(KindRefresh { stored, skipped })
    }
}
