//! Queue upload: pending events to the server in bounded batches.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::transport::{SyncTransport, TransportError};
use super::wire::{PushRequest, PushResponse};
use crate::models::{FailureClass, LocalId, QueuedEvent, SyncStatus};
use crate::services::SyncStore;
use crate::{Error, Result};

/// Holds a shared busy flag for as long as it lives.
pub(crate) struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    pub(crate) fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Batch-wide failure: nothing in the batch got a per-record answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub error: TransportError,
    /// Records marked as failed because of it
    pub marked: usize,
}

/// Counts from one push attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub attempted: usize,
    pub synced: usize,
    pub rejected_definitive: usize,
    pub rejected_retriable: usize,
    /// Records the server answered for in neither array; they stay eligible
    pub unanswered: usize,
    pub failure: Option<BatchFailure>,
}

impl PushReport {
    /// Whether the server actually answered (or there was nothing to send)
    pub const fn reached_server(&self) -> bool {
        self.failure.is_none()
    }

    pub fn auth_rejected(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(|failure| failure.error.is_unauthorized())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Another push was already running; nothing was sent
    Busy,
    /// The requested record was already synced; nothing was sent
    AlreadySynced(LocalId),
    Completed(PushReport),
}

impl PushOutcome {
    pub const fn report(&self) -> Option<&PushReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Busy | Self::AlreadySynced(_) => None,
        }
    }
}

/// Uploads queued events and reconciles the per-record results.
///
/// At most one push runs at a time; a second caller gets [`PushOutcome::Busy`].
#[derive(Clone)]
pub struct PushComponent {
    store: SyncStore,
    transport: Arc<dyn SyncTransport>,
    batch_size: usize,
    in_flight: Arc<AtomicBool>,
}

impl PushComponent {
    pub fn new(store: SyncStore, transport: Arc<dyn SyncTransport>, batch_size: usize) -> Self {
        Self {
            store,
            transport,
            batch_size: batch_size.max(1),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Submit the oldest eligible records as one batch.
    pub async fn push_pending_records(&self, cancel: &CancellationToken) -> Result<PushOutcome> {
        let Some(_guard) = InFlightGuard::try_acquire(&self.in_flight) else {
            tracing::debug!("Push already in progress");
            return Ok(PushOutcome::Busy);
        };

        let records = self.store.list_pending(self.batch_size)?;
        if records.is_empty() {
            tracing::debug!("No pending records to push");
            return Ok(PushOutcome::Completed(PushReport::default()));
        }

        self.submit(&records, cancel).await.map(PushOutcome::Completed)
    }

    /// Submit one record regardless of its eligibility.
    ///
    /// Definitive and auth-blocked records are sent as well; an operator asked
    /// for it explicitly.
    pub async fn force_push_record(
        &self,
        id: LocalId,
        cancel: &CancellationToken,
    ) -> Result<PushOutcome> {
        let Some(_guard) = InFlightGuard::try_acquire(&self.in_flight) else {
            return Ok(PushOutcome::Busy);
        };

        let record = self
            .store
            .get_event(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if record.server_id.is_some() || record.sync_status == SyncStatus::Synced {
            tracing::info!("Record {} is already synced", id);
            return Ok(PushOutcome::AlreadySynced(id));
        }

        self.submit(std::slice::from_ref(&record), cancel)
            .await
            .map(PushOutcome::Completed)
    }

    async fn submit(&self, records: &[QueuedEvent], cancel: &CancellationToken) -> Result<PushReport> {
        let request = PushRequest::from_events(records);
        tracing::info!("Pushing {} queued records", records.len());

        let result = self.transport.submit_batch(&request, cancel).await;
        if !matches!(&result, Err(error) if error.is_configuration()) {
            self.count_retries(records)?;
        }
        match result {
            Ok(response) => self.reconcile(records, response),
            Err(error) => self.fail_batch(records, error),
        }
    }

    /// Counted only once a request actually left; runs before the new
    /// outcome overwrites the `error` status.
    fn count_retries(&self, records: &[QueuedEvent]) -> Result<()> {
        let retried: Vec<LocalId> = records
            .iter()
            .filter(|record| record.sync_status == SyncStatus::Error)
            .map(|record| record.local_id)
            .collect();
        self.store.record_retries(&retried)
    }

    fn reconcile(&self, records: &[QueuedEvent], response: PushResponse) -> Result<PushReport> {
        let by_wire_id: HashMap<String, LocalId> = records
            .iter()
            .map(|record| (record.wire_id(), record.local_id))
            .collect();
        let in_batch: HashSet<LocalId> = records.iter().map(|record| record.local_id).collect();
        let resolve = |echo: &str| {
            by_wire_id.get(echo.trim()).copied().or_else(|| {
                echo.trim()
                    .parse::<LocalId>()
                    .ok()
                    .filter(|id| in_batch.contains(id))
            })
        };

        let mut report = PushReport {
            attempted: records.len(),
            ..PushReport::default()
        };
        let mut answered = HashSet::new();

        for accepted in &response.sincronizados {
            let Some(id) = resolve(&accepted.id_local) else {
                tracing::warn!("Server accepted unknown record {}", accepted.id_local);
                continue;
            };
            self.store.mark_synced(id, &accepted.id_servidor)?;
            if answered.insert(id) {
                report.synced += 1;
            }
        }

        for rejected in &response.rechazados {
            let Some(id) = resolve(&rejected.id_local) else {
                tracing::warn!("Server rejected unknown record {}", rejected.id_local);
                continue;
            };
            if !answered.insert(id) {
                // Already accepted in this response; acceptance wins.
                continue;
            }
            let class = if rejected.is_definitive() {
                report.rejected_definitive += 1;
                FailureClass::Definitive
            } else {
                report.rejected_retriable += 1;
                FailureClass::Retriable
            };
            let message = rejected.message();
            tracing::warn!("Record {} rejected: {}", id, message);
            self.store.mark_error(id, &message, class)?;
        }

        report.unanswered = records.len() - answered.len();
        if report.unanswered > 0 {
            tracing::warn!(
                "Server did not answer for {} records; they stay pending",
                report.unanswered
            );
        }
        tracing::info!(
            "Push finished: {} synced, {} rejected",
            report.synced,
            report.rejected_definitive + report.rejected_retriable
        );
        Ok(report)
    }

    fn fail_batch(&self, records: &[QueuedEvent], error: TransportError) -> Result<PushReport> {
        let mut marked = 0;
        if error.is_configuration() {
            tracing::warn!("Push not attempted: {}", error);
        } else {
            tracing::warn!("Push of {} records failed: {}", records.len(), error);
            let message = error.to_string();
            let class = error.failure_class();
            for record in records {
                if self.store.mark_error(record.local_id, &message, class)? {
                    marked += 1;
                }
            }
        }

        Ok(PushReport {
            attempted: records.len(),
            failure: Some(BatchFailure { error, marked }),
            ..PushReport::default()
        })
    }
}
