//! Scripted transport for exercising the sync engine without a server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::transport::{SyncTransport, TransportError, TransportFuture, TransportResult};
use super::wire::{AcceptedRecord, PushRequest, PushResponse};
use crate::models::ReferenceKind;

/// Pauses submissions until released, to hold a cycle in flight.
#[derive(Clone, Default)]
pub struct SubmitGate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
pub struct FakeTransport {
    references: Mutex<HashMap<ReferenceKind, TransportResult<Vec<Value>>>>,
    responses: Mutex<VecDeque<TransportResult<PushResponse>>>,
    submitted: Mutex<Vec<PushRequest>>,
    fetches: AtomicUsize,
    gate: Mutex<Option<SubmitGate>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reference(&self, kind: ReferenceKind, rows: Vec<Value>) {
        self.references.lock().unwrap().insert(kind, Ok(rows));
    }

    pub fn fail_reference(&self, kind: ReferenceKind, error: TransportError) {
        self.references.lock().unwrap().insert(kind, Err(error));
    }

    /// Queue the outcome of the next submission. Without one, every record
    /// in the batch is accepted.
    pub fn respond(&self, response: TransportResult<PushResponse>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn gate(&self) -> SubmitGate {
        let gate = SubmitGate::default();
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn submitted(&self) -> Vec<PushRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

/// Accept every record of a request with a server ID derived from its wire ID.
pub fn accept_all(request: &PushRequest) -> PushResponse {
    PushResponse {
        sincronizados: request
            .registros
            .iter()
            .map(|record| AcceptedRecord {
                id_local: record.id.clone(),
                id_servidor: format!("srv-{}", record.id),
            })
            .collect(),
        rechazados: Vec::new(),
    }
}

impl SyncTransport for FakeTransport {
    fn fetch_reference<'a>(
        &'a self,
        kind: ReferenceKind,
        _cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, Vec<Value>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let result = self
            .references
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()));
        Box::pin(async move { result })
    }

    fn submit_batch<'a>(
        &'a self,
        request: &'a PushRequest,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, PushResponse> {
        Box::pin(async move {
            self.submitted.lock().unwrap().push(request.clone());
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.entered.notify_one();
                tokio::select! {
                    () = cancel.cancelled() => return Err(TransportError::Cancelled),
                    () = gate.release.notified() => {}
                }
            }
            let scripted = self.responses.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(accept_all(request)))
        })
    }
}
