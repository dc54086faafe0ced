//! Sync orchestrator: connectivity, timers and the Pull→Push cycle.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::pull::{PullComponent, PullReport};
use super::push::{InFlightGuard, PushComponent, PushOutcome, PushReport};
use super::status::{StatusFlags, SyncState, SyncStatus};
use super::transport::{ApiCredentials, HttpTransport, SyncTransport, TransportError};
use crate::config::{normalize_base_url, ConfigError, SyncConfig, MIN_SYNC_INTERVAL};
use crate::models::LocalId;
use crate::services::SyncStore;
use crate::util::unix_millis_now;
use crate::Result;

/// Why a cycle was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    /// Bootstrap cycle; runs even while offline
    Initial,
    Periodic,
    /// Connectivity came back; `full` after a long outage
    Reconnect { full: bool },
    TokenRefresh,
    Manual,
}

impl SyncReason {
    const fn runs_offline(self) -> bool {
        matches!(self, Self::Initial)
    }

    pub const fn is_full_resync(self) -> bool {
        matches!(self, Self::Reconnect { full: true })
    }
}

impl fmt::Display for SyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initial => "initial",
            Self::Periodic => "periodic",
            Self::Reconnect { full: false } => "reconnect",
            Self::Reconnect { full: true } => "full resync",
            Self::TokenRefresh => "token refresh",
            Self::Manual => "manual",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A cycle was already running
    Busy,
    Offline,
}

/// Everything one completed cycle did
#[derive(Debug)]
pub struct CycleReport {
    pub reason: SyncReason,
    pub pull: PullReport,
    pub push: PushOutcome,
}

impl CycleReport {
    pub fn auth_rejected(&self) -> bool {
        self.pull.auth_rejected()
            || self
                .push
                .report()
                .is_some_and(PushReport::auth_rejected)
    }

    /// Combined pull/push failure message, `None` for a clean cycle
    pub fn error_summary(&self) -> Option<String> {
        let push_error = self
            .push
            .report()
            .and_then(|report| report.failure.as_ref())
            .map(|failure| format!("push failed ({})", failure.error));
        match (self.pull.error_summary(), push_error) {
            (Some(pull), Some(push)) => Some(format!("{pull}; {push}")),
            (pull, push) => pull.or(push),
        }
    }
}

#[derive(Debug)]
pub enum SyncOutcome {
    Completed(CycleReport),
    Skipped(SkipReason),
    /// Unexpected internal failure, already recorded in the status
    Failed(String),
}

/// Result of a forced pull or push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceOutcome<T> {
    Completed(T),
    /// Nothing was attempted because the terminal is offline
    Offline,
}

#[derive(Default)]
struct Runtime {
    state: SyncState,
    online: bool,
    offline_since: Option<i64>,
    needs_reauth: bool,
    full_resync: bool,
    reconnect: Option<JoinHandle<()>>,
    reconnect_generation: u64,
    reconnect_full: bool,
    periodic: Option<JoinHandle<()>>,
}

impl Runtime {
    const fn flags(&self) -> StatusFlags {
        StatusFlags {
            is_online: self.online,
            needs_reauth: self.needs_reauth,
            full_resync: self.full_resync,
        }
    }

    fn cancel_reconnect(&mut self) -> bool {
        self.reconnect.take().is_some_and(|pending| {
            pending.abort();
            true
        })
    }
}

struct Inner {
    store: SyncStore,
    pull: PullComponent,
    push: PushComponent,
    credentials: ApiCredentials,
    sync_interval: Duration,
    reconnect_cooldown: Duration,
    full_resync_threshold_ms: i64,
    syncing: Arc<AtomicBool>,
    runtime: Mutex<Runtime>,
    status: watch::Sender<SyncStatus>,
    cancel: CancellationToken,
}

/// The only sync entry point the rest of the terminal talks to.
///
/// Cheap to clone; clones drive the same engine. Timer-based operations need
/// to be called from within a Tokio runtime.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let runtime = self.runtime();
        formatter
            .debug_struct("SyncOrchestrator")
            .field("state", &runtime.state)
            .field("online", &runtime.online)
            .field("credentials", &self.inner.credentials)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Build an orchestrator talking HTTP to the configured server.
    pub fn new(store: SyncStore, config: &SyncConfig) -> std::result::Result<Self, TransportError> {
        let credentials = ApiCredentials::from_config(config);
        let transport = HttpTransport::new(config, credentials.clone())?;
        Ok(Self::with_transport(
            store,
            config,
            credentials,
            Arc::new(transport),
        ))
    }

    /// Build an orchestrator over any transport.
    ///
    /// `credentials` is the handle [`Self::update_auth_token`] writes to; it
    /// should be the one the transport reads from.
    pub fn with_transport(
        store: SyncStore,
        config: &SyncConfig,
        credentials: ApiCredentials,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        let metadata = store.read_metadata().unwrap_or_else(|error| {
            tracing::warn!("Failed to read sync metadata, assuming offline: {}", error);
            crate::models::SyncMetadata::default()
        });
        let runtime = Runtime {
            state: if metadata.is_online {
                SyncState::Idle
            } else {
                SyncState::Offline
            },
            online: metadata.is_online,
            offline_since: metadata.offline_since,
            ..Runtime::default()
        };
        let initial_status = store
            .counts()
            .map(|counts| SyncStatus::compose(runtime.state, &metadata, &counts, runtime.flags()))
            .unwrap_or_default();
        let (status, _) = watch::channel(initial_status);

        Self {
            inner: Arc::new(Inner {
                pull: PullComponent::new(store.clone(), Arc::clone(&transport)),
                push: PushComponent::new(store.clone(), transport, config.batch_size),
                store,
                credentials,
                sync_interval: config.sync_interval.max(MIN_SYNC_INTERVAL),
                reconnect_cooldown: config.reconnect_cooldown,
                full_resync_threshold_ms: i64::try_from(config.full_resync_threshold.as_millis())
                    .unwrap_or(i64::MAX),
                syncing: Arc::new(AtomicBool::new(false)),
                runtime: Mutex::new(runtime),
                status,
                cancel: CancellationToken::new(),
            }),
        }
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.inner
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &SyncStore {
        &self.inner.store
    }

    pub fn is_online(&self) -> bool {
        self.runtime().online
    }

    pub fn state(&self) -> SyncState {
        self.runtime().state
    }

    /// Report a connectivity change.
    ///
    /// Going online schedules one resync after the reconnect cooldown. Each
    /// further flip restarts that wait, so only the state holding at the end
    /// of the cooldown is acted on.
    pub fn set_online_status(&self, online: bool) {
        let now = unix_millis_now();
        let mut runtime = self.runtime();
        if runtime.online == online {
            tracing::debug!("Connectivity unchanged (online: {})", online);
            return;
        }

        runtime.online = online;
        if online {
            let long_outage = runtime
                .offline_since
                .take()
                .is_some_and(|since| now.saturating_sub(since) >= self.inner.full_resync_threshold_ms);
            runtime.reconnect_full |= long_outage;
            runtime.cancel_reconnect();
            runtime.reconnect_generation = runtime.reconnect_generation.wrapping_add(1);
            runtime.reconnect = self.schedule_reconnect(runtime.reconnect_generation);
            if runtime.state == SyncState::Offline {
                runtime.state = SyncState::Idle;
            }
            tracing::info!(
                "Connectivity restored; resync in {}ms{}",
                self.inner.reconnect_cooldown.as_millis(),
                if runtime.reconnect_full { " (full)" } else { "" }
            );
        } else {
            runtime.offline_since = Some(now);
            if runtime.cancel_reconnect() {
                tracing::debug!("Pending reconnect resync cancelled");
            }
            runtime.state = SyncState::Offline;
            tracing::info!("Connectivity lost; sync paused");
        }

        let offline_since = runtime.offline_since;
        drop(runtime);

        if let Err(error) = self.inner.store.update_metadata(|metadata| {
            metadata.is_online = online;
            metadata.offline_since = offline_since;
        }) {
            tracing::warn!("Failed to persist connectivity: {}", error);
        }
        self.publish();
    }

    /// Treat this handle as online for forced operations.
    ///
    /// Unlike [`Self::set_online_status`], nothing is persisted and no
    /// reconnect resync is scheduled.
    pub fn assume_online(&self) {
        {
            let mut runtime = self.runtime();
            if runtime.online {
                return;
            }
            runtime.online = true;
            if runtime.state == SyncState::Offline {
                runtime.state = SyncState::Idle;
            }
        }
        tracing::debug!("Assuming connectivity for this session");
        self.publish();
    }

    fn schedule_reconnect(&self, generation: u64) -> Option<JoinHandle<()>> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; reconnect resync not scheduled");
            return None;
        };
        let orchestrator = self.clone();
        let cooldown = self.inner.reconnect_cooldown;
        Some(handle.spawn(async move {
            tokio::time::sleep(cooldown).await;
            orchestrator.run_reconnect(generation).await;
        }))
    }

    async fn run_reconnect(&self, generation: u64) {
        let full = {
            let mut runtime = self.runtime();
            if runtime.reconnect_generation != generation || !runtime.online {
                return;
            }
            runtime.reconnect = None;
            std::mem::take(&mut runtime.reconnect_full)
        };
        self.perform_sync(SyncReason::Reconnect { full }).await;
    }

    /// Run one Pull→Push cycle.
    ///
    /// Never returns an error: failures end up in the status and the outcome.
    /// A call while another cycle runs is dropped, not queued.
    pub async fn perform_sync(&self, reason: SyncReason) -> SyncOutcome {
        if !reason.runs_offline() && !self.is_online() {
            tracing::debug!("Offline; skipping {} sync", reason);
            return SyncOutcome::Skipped(SkipReason::Offline);
        }
        let Some(guard) = InFlightGuard::try_acquire(&self.inner.syncing) else {
            tracing::info!("Sync already in progress; dropping {} trigger", reason);
            return SyncOutcome::Skipped(SkipReason::Busy);
        };

        let orchestrator = self.clone();
        let cycle = tokio::spawn(async move {
            let _guard = guard;
            orchestrator.run_cycle(reason).await
        });

        match cycle.await {
            Ok(outcome) => outcome,
            Err(error) => self.fail_cycle(format!("Sync cycle aborted: {error}")),
        }
    }

    async fn run_cycle(&self, reason: SyncReason) -> SyncOutcome {
        tracing::info!("Sync cycle started ({})", reason);
        self.runtime().full_resync = reason.is_full_resync();

        self.set_state(SyncState::Pulling);
        let pull = self.inner.pull.full_pull(&self.inner.cancel).await;

        self.set_state(SyncState::Pushing);
        let push = match self.inner.push.push_pending_records(&self.inner.cancel).await {
            Ok(push) => push,
            Err(error) => return self.fail_cycle(format!("Push failed: {error}")),
        };

        let report = CycleReport { reason, pull, push };
        let now = unix_millis_now();
        let last_error = report.error_summary();
        let pulled = report.pull.any_success();
        let pushed = report
            .push
            .report()
            .is_some_and(PushReport::reached_server);
        if let Err(error) = self.inner.store.update_metadata(|metadata| {
            if pulled {
                metadata.last_pull_at = Some(now);
            }
            if pushed {
                metadata.last_push_at = Some(now);
            }
            metadata.last_error = last_error.clone();
        }) {
            return self.fail_cycle(format!("Failed to record sync metadata: {error}"));
        }

        {
            let mut runtime = self.runtime();
            runtime.needs_reauth = report.auth_rejected();
            runtime.state = if runtime.online {
                SyncState::Idle
            } else {
                SyncState::Offline
            };
        }
        self.publish();

        match &last_error {
            Some(error) => tracing::warn!("Sync cycle ({}) finished with errors: {}", reason, error),
            None => tracing::info!("Sync cycle ({}) finished", reason),
        }
        SyncOutcome::Completed(report)
    }

    fn fail_cycle(&self, message: String) -> SyncOutcome {
        tracing::error!("{}", message);
        self.runtime().state = SyncState::Error;
        if let Err(error) = self
            .inner
            .store
            .update_metadata(|metadata| metadata.last_error = Some(message.clone()))
        {
            tracing::warn!("Failed to record sync error: {}", error);
        }
        self.publish();
        SyncOutcome::Failed(message)
    }

    fn set_state(&self, state: SyncState) {
        let previous = std::mem::replace(&mut self.runtime().state, state);
        if previous != state {
            tracing::debug!("Sync state {} -> {}", previous, state);
        }
        self.publish();
    }

    /// Current status with counts recomputed from the store.
    pub fn status(&self) -> Result<SyncStatus> {
        let (state, flags) = {
            let runtime = self.runtime();
            (runtime.state, runtime.flags())
        };
        let metadata = self.inner.store.read_metadata()?;
        let counts = self.inner.store.counts()?;
        Ok(SyncStatus::compose(state, &metadata, &counts, flags))
    }

    /// Receive a fresh [`SyncStatus`] on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    fn publish(&self) {
        match self.status() {
            Ok(status) => {
                self.inner.status.send_replace(status);
            }
            Err(error) => {
                tracing::warn!("Failed to refresh sync status: {}", error);
                let (state, flags) = {
                    let runtime = self.runtime();
                    (runtime.state, runtime.flags())
                };
                self.inner.status.send_modify(|status| {
                    status.state = state;
                    status.is_online = flags.is_online;
                    status.needs_reauth = flags.needs_reauth;
                });
            }
        }
    }

    /// Run a bootstrap cycle now, then one per interval while online.
    pub fn start_periodic_sync(&self) {
        let mut runtime = self.runtime();
        if runtime.periodic.is_some() {
            tracing::debug!("Periodic sync already running");
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; periodic sync not started");
            return;
        };

        let orchestrator = self.clone();
        let interval = self.inner.sync_interval;
        runtime.periodic = Some(handle.spawn(async move {
            orchestrator.spawn_cycle(SyncReason::Initial);
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if orchestrator.is_online() {
                    orchestrator.spawn_cycle(SyncReason::Periodic);
                } else {
                    tracing::debug!("Offline; periodic tick skipped");
                }
            }
        }));
        tracing::info!("Periodic sync started (every {}s)", interval.as_secs());
    }

    /// Stop the periodic timer. A cycle already running is left to finish.
    pub fn stop_periodic_sync(&self) {
        if let Some(periodic) = self.runtime().periodic.take() {
            periodic.abort();
            tracing::info!("Periodic sync stopped");
        }
    }

    fn spawn_cycle(&self, reason: SyncReason) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; {} sync not started", reason);
            return false;
        };
        let orchestrator = self.clone();
        handle.spawn(async move {
            orchestrator.perform_sync(reason).await;
        });
        true
    }

    /// Replace the bearer token used for every request.
    ///
    /// A non-empty token releases auth-blocked records and, when online,
    /// requests a sync right away. Returns whether that sync was requested;
    /// like any trigger, it is dropped if a cycle is already running.
    pub fn update_auth_token(&self, token: Option<String>) -> bool {
        self.inner.credentials.set_token(token);
        if self.inner.credentials.token().is_none() {
            tracing::info!("Auth token cleared");
            return false;
        }

        match self.inner.store.release_auth_blocked() {
            Ok(0) => {}
            Ok(released) => tracing::info!("Released {} auth-blocked records", released),
            Err(error) => tracing::warn!("Failed to release auth-blocked records: {}", error),
        }
        let online = {
            let mut runtime = self.runtime();
            runtime.needs_reauth = false;
            runtime.online
        };
        self.publish();

        online && self.spawn_cycle(SyncReason::TokenRefresh)
    }

    /// Point every later request at another server, or at none.
    pub fn update_base_url(
        &self,
        base_url: Option<String>,
    ) -> std::result::Result<(), ConfigError> {
        let base_url = base_url.map(normalize_base_url).transpose()?;
        match &base_url {
            Some(url) => tracing::info!("Sync server set to {}", url),
            None => tracing::info!("Sync server cleared"),
        }
        self.inner.credentials.set_base_url(base_url);
        Ok(())
    }

    /// Push pending records now, outside the cycle.
    pub async fn force_push(&self) -> Result<ForceOutcome<PushOutcome>> {
        if !self.is_online() {
            return Ok(ForceOutcome::Offline);
        }
        let outcome = self.inner.push.push_pending_records(&self.inner.cancel).await?;
        self.record_forced_push(&outcome);
        Ok(ForceOutcome::Completed(outcome))
    }

    /// Push one record now, even if it is not eligible for automatic retry.
    pub async fn force_push_record(&self, id: LocalId) -> Result<ForceOutcome<PushOutcome>> {
        if !self.is_online() {
            return Ok(ForceOutcome::Offline);
        }
        let outcome = self
            .inner
            .push
            .force_push_record(id, &self.inner.cancel)
            .await?;
        self.record_forced_push(&outcome);
        Ok(ForceOutcome::Completed(outcome))
    }

    fn record_forced_push(&self, outcome: &PushOutcome) {
        if let Some(report) = outcome.report() {
            if report.reached_server() {
                let now = unix_millis_now();
                if let Err(error) = self
                    .inner
                    .store
                    .update_metadata(|metadata| metadata.last_push_at = Some(now))
                {
                    tracing::warn!("Failed to record push time: {}", error);
                }
            }
            if report.auth_rejected() {
                self.runtime().needs_reauth = true;
            }
        }
        self.publish();
    }

    /// Refresh the reference cache now, outside the cycle.
    pub async fn force_pull(&self) -> ForceOutcome<PullReport> {
        if !self.is_online() {
            return ForceOutcome::Offline;
        }
        let report = self.inner.pull.full_pull(&self.inner.cancel).await;
        if report.any_success() {
            let now = unix_millis_now();
            if let Err(error) = self
                .inner
                .store
                .update_metadata(|metadata| metadata.last_pull_at = Some(now))
            {
                tracing::warn!("Failed to record pull time: {}", error);
            }
        }
        if report.auth_rejected() {
            self.runtime().needs_reauth = true;
        }
        self.publish();
        ForceOutcome::Completed(report)
    }

    /// Stop every timer and cancel in-flight requests.
    pub fn shutdown(&self) {
        {
            let mut runtime = self.runtime();
            runtime.cancel_reconnect();
            if let Some(periodic) = runtime.periodic.take() {
                periodic.abort();
            }
        }
        self.inner.cancel.cancel();
        tracing::info!("Sync orchestrator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, FailureClass, NewEvent, QueuedEvent, SyncStatus as RecordStatus};
    use crate::sync::test_support::FakeTransport;
    use crate::sync::wire::{AcceptedRecord, PushRequest, PushResponse, RejectedRecord};
    use crate::sync::{PullError, TransportFuture};
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    const KINDS: usize = crate::models::ReferenceKind::ALL.len();

    fn store(online: bool) -> SyncStore {
        let store = SyncStore::open_in_memory().unwrap();
        store
            .update_metadata(|metadata| metadata.is_online = online)
            .unwrap();
        store
    }

    fn orchestrator_with(
        store: &SyncStore,
        config: &SyncConfig,
    ) -> (SyncOrchestrator, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::new());
        let orchestrator = SyncOrchestrator::with_transport(
            store.clone(),
            config,
            ApiCredentials::default(),
            transport.clone(),
        );
        (orchestrator, transport)
    }

    fn orchestrator(store: &SyncStore) -> (SyncOrchestrator, Arc<FakeTransport>) {
        orchestrator_with(store, &SyncConfig::default())
    }

    fn enqueue(store: &SyncStore, employee: i64) -> QueuedEvent {
        store
            .enqueue(&NewEvent::new(employee, EventType::Entry, "kiosk-1"))
            .unwrap()
    }

    /// Let spawned tasks run until `done` holds.
    async fn settle(done: impl Fn() -> bool) -> bool {
        for _ in 0..1_000 {
            if done() {
                return true;
            }
            tokio::task::yield_now().await;
        }
        done()
    }

    #[tokio::test]
    async fn cycle_reconciles_mixed_batch() {
        let store = store(true);
        let (orchestrator, transport) = orchestrator(&store);
        let queued: Vec<_> = (1..=3).map(|employee| enqueue(&store, employee)).collect();
        transport.respond(Ok(PushResponse {
            sincronizados: vec![
                AcceptedRecord {
                    id_local: queued[0].wire_id(),
                    id_servidor: "501".to_string(),
                },
                AcceptedRecord {
                    id_local: queued[1].wire_id(),
                    id_servidor: "502".to_string(),
                },
            ],
            rechazados: vec![RejectedRecord {
                id_local: queued[2].wire_id(),
                error: Some("faltan campos".to_string()),
                codigo: Some("CAMPOS_FALTANTES".to_string()),
            }],
        }));

        let outcome = orchestrator.perform_sync(SyncReason::Manual).await;
        assert!(matches!(outcome, SyncOutcome::Completed(_)));

        assert!(store.list_pending(50).unwrap().is_empty());
        let first = store.get_event(queued[0].local_id).unwrap().unwrap();
        assert_eq!(first.sync_status, RecordStatus::Synced);
        assert_eq!(first.server_id.as_deref(), Some("501"));
        let second = store.get_event(queued[1].local_id).unwrap().unwrap();
        assert_eq!(second.server_id.as_deref(), Some("502"));
        let third = store.get_event(queued[2].local_id).unwrap().unwrap();
        assert_eq!(third.sync_status, RecordStatus::Error);
        assert!(third.is_definitive_error);

        let status = orchestrator.status().unwrap();
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.pending, 0);
        assert_eq!(status.errors, 1);
        assert_eq!(status.last_error, None);
        assert!(status.last_sync.is_some());

        let metadata = store.read_metadata().unwrap();
        assert!(metadata.last_pull_at.is_some());
        assert!(metadata.last_push_at.is_some());
    }

    #[tokio::test]
    async fn offline_sync_does_nothing() {
        let store = store(false);
        let (orchestrator, transport) = orchestrator(&store);
        enqueue(&store, 1);

        let outcome = orchestrator.perform_sync(SyncReason::Periodic).await;

        assert!(matches!(outcome, SyncOutcome::Skipped(SkipReason::Offline)));
        assert_eq!(transport.fetch_count(), 0);
        assert_eq!(transport.submission_count(), 0);
        assert_eq!(orchestrator.state(), SyncState::Offline);
        assert_eq!(store.list_pending(50).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn initial_sync_runs_while_offline() {
        let store = store(false);
        let (orchestrator, transport) = orchestrator(&store);

        let outcome = orchestrator.perform_sync(SyncReason::Initial).await;

        assert!(matches!(outcome, SyncOutcome::Completed(_)));
        assert_eq!(transport.fetch_count(), KINDS);
        assert_eq!(orchestrator.state(), SyncState::Offline);
    }

    #[tokio::test]
    async fn concurrent_sync_is_skipped() {
        let store = store(true);
        let (orchestrator, transport) = orchestrator(&store);
        let queued = enqueue(&store, 1);
        let gate = transport.gate();

        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.perform_sync(SyncReason::Manual).await })
        };
        gate.entered.notified().await;
        assert_eq!(orchestrator.state(), SyncState::Pushing);

        let second = orchestrator.perform_sync(SyncReason::Periodic).await;
        assert!(matches!(second, SyncOutcome::Skipped(SkipReason::Busy)));
        assert_eq!(
            store.get_event(queued.local_id).unwrap().unwrap().sync_status,
            RecordStatus::Pending
        );

        gate.release.notify_one();
        assert!(matches!(running.await.unwrap(), SyncOutcome::Completed(_)));
        assert_eq!(transport.submission_count(), 1);
        assert_eq!(transport.fetch_count(), KINDS);
    }

    #[tokio::test]
    async fn token_refresh_during_cycle_is_dropped() {
        let store = store(true);
        let (orchestrator, transport) = orchestrator(&store);
        enqueue(&store, 1);
        let gate = transport.gate();

        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.perform_sync(SyncReason::Manual).await })
        };
        gate.entered.notified().await;

        assert!(orchestrator.update_auth_token(Some("fresh-token".to_string())));
        settle(|| false).await;
        assert_eq!(transport.fetch_count(), KINDS);

        gate.release.notify_one();
        assert!(matches!(running.await.unwrap(), SyncOutcome::Completed(_)));
        assert_eq!(transport.submission_count(), 1);
        assert_eq!(transport.fetch_count(), KINDS);
    }

    #[tokio::test]
    async fn transport_failures_are_recorded_not_raised() {
        let store = store(true);
        let (orchestrator, transport) = orchestrator(&store);
        let queued = enqueue(&store, 1);
        transport.respond(Err(TransportError::Network("connection reset".to_string())));

        let outcome = orchestrator.perform_sync(SyncReason::Manual).await;

        let SyncOutcome::Completed(report) = outcome else {
            panic!("expected a completed cycle");
        };
        assert!(report.error_summary().unwrap().contains("connection reset"));
        let status = orchestrator.status().unwrap();
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.last_error.unwrap().contains("connection reset"));

        let failed = store.get_event(queued.local_id).unwrap().unwrap();
        assert_eq!(failed.sync_status, RecordStatus::Error);
        assert!(!failed.is_definitive_error);
        assert!(store.read_metadata().unwrap().last_push_at.is_none());
    }

    struct PanickingTransport;

    impl SyncTransport for PanickingTransport {
        fn fetch_reference<'a>(
            &'a self,
            _kind: crate::models::ReferenceKind,
            _cancel: &'a CancellationToken,
        ) -> TransportFuture<'a, Vec<Value>> {
            panic!("transport exploded")
        }

        fn submit_batch<'a>(
            &'a self,
            _request: &'a PushRequest,
            _cancel: &'a CancellationToken,
        ) -> TransportFuture<'a, PushResponse> {
            panic!("transport exploded")
        }
    }

    #[tokio::test]
    async fn unexpected_failure_ends_in_error_state() {
        let store = store(true);
        let orchestrator = SyncOrchestrator::with_transport(
            store.clone(),
            &SyncConfig::default(),
            ApiCredentials::default(),
            Arc::new(PanickingTransport),
        );

        let outcome = orchestrator.perform_sync(SyncReason::Manual).await;

        assert!(matches!(outcome, SyncOutcome::Failed(_)));
        assert_eq!(orchestrator.state(), SyncState::Error);
        assert!(store.read_metadata().unwrap().last_error.is_some());

        // The in-flight flag is released for the next attempt.
        let again = orchestrator.perform_sync(SyncReason::Manual).await;
        assert!(matches!(again, SyncOutcome::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_waits_for_cooldown() {
        let store = store(false);
        let config = SyncConfig::default().with_reconnect_cooldown(Duration::from_secs(10));
        let (orchestrator, transport) = orchestrator_with(&store, &config);

        orchestrator.set_online_status(true);
        assert_eq!(orchestrator.state(), SyncState::Idle);
        assert!(store.read_metadata().unwrap().is_online);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(transport.fetch_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(settle(|| transport.fetch_count() == KINDS).await);
    }

    #[tokio::test(start_paused = true)]
    async fn flickering_connectivity_resyncs_once() {
        let store = store(false);
        let (orchestrator, transport) = orchestrator(&store);

        orchestrator.set_online_status(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        orchestrator.set_online_status(false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        orchestrator.set_online_status(true);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.fetch_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(settle(|| transport.fetch_count() == KINDS).await);

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle(|| false).await;
        assert_eq!(transport.fetch_count(), KINDS);
    }

    #[tokio::test(start_paused = true)]
    async fn going_offline_cancels_pending_reconnect() {
        let store = store(false);
        let (orchestrator, transport) = orchestrator(&store);

        orchestrator.set_online_status(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        orchestrator.set_online_status(false);
        orchestrator.set_online_status(false);

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle(|| false).await;
        assert_eq!(transport.fetch_count(), 0);
        assert_eq!(orchestrator.state(), SyncState::Offline);
        assert!(store.read_metadata().unwrap().offline_since.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn long_outage_flags_full_resync() {
        let store = store(true);
        let config = SyncConfig::default().with_full_resync_threshold(Duration::ZERO);
        let (orchestrator, transport) = orchestrator_with(&store, &config);
        let mut status = orchestrator.subscribe();

        orchestrator.set_online_status(false);
        orchestrator.set_online_status(true);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(settle(|| transport.fetch_count() == KINDS).await);
        assert!(settle(|| orchestrator.state() == SyncState::Idle).await);

        assert!(status.has_changed().unwrap());
        assert!(status.borrow_and_update().full_resync);
    }

    #[tokio::test]
    async fn new_token_releases_auth_blocked_records() {
        let store = store(true);
        let (orchestrator, transport) = orchestrator(&store);
        let queued = enqueue(&store, 1);
        transport.respond(Err(TransportError::Unauthorized { status: 401 }));

        orchestrator.perform_sync(SyncReason::Manual).await;
        assert!(orchestrator.status().unwrap().needs_reauth);
        assert!(store.get_event(queued.local_id).unwrap().unwrap().auth_blocked);

        assert!(!orchestrator.update_auth_token(Some("   ".to_string())));
        assert!(orchestrator.update_auth_token(Some("fresh-token".to_string())));
        assert!(!orchestrator.status().unwrap().needs_reauth);

        assert!(
            settle(|| {
                store
                    .get_event(queued.local_id)
                    .unwrap()
                    .is_some_and(|event| event.sync_status == RecordStatus::Synced)
            })
            .await
        );
        assert_eq!(transport.submission_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sync_ticks_until_stopped() {
        let store = store(true);
        let config = SyncConfig::default().with_sync_interval(Duration::from_secs(60));
        let (orchestrator, transport) = orchestrator_with(&store, &config);

        orchestrator.start_periodic_sync();
        orchestrator.start_periodic_sync();
        assert!(settle(|| transport.fetch_count() == KINDS).await);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(settle(|| transport.fetch_count() == 2 * KINDS).await);

        orchestrator.set_online_status(false);
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle(|| false).await;
        assert_eq!(transport.fetch_count(), 2 * KINDS);

        orchestrator.stop_periodic_sync();
        orchestrator.set_online_status(true);
        tokio::time::sleep(Duration::from_secs(300)).await;
        settle(|| false).await;
        // Only the reconnect resync ran.
        assert_eq!(transport.fetch_count(), 3 * KINDS);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_still_ticks() {
        let store = store(true);
        let config = SyncConfig {
            sync_interval: Duration::ZERO,
            ..SyncConfig::default()
        };
        let (orchestrator, transport) = orchestrator_with(&store, &config);

        orchestrator.start_periodic_sync();
        assert!(settle(|| transport.fetch_count() == KINDS).await);

        tokio::time::sleep(MIN_SYNC_INTERVAL).await;
        assert!(settle(|| transport.fetch_count() >= 2 * KINDS).await);
        orchestrator.stop_periodic_sync();
    }

    #[tokio::test]
    async fn cleared_base_url_fails_pull_as_configuration() {
        let store = store(true);
        let config = SyncConfig::new("https://attendance.example.com").unwrap();
        let orchestrator = SyncOrchestrator::new(store, &config).unwrap();

        assert!(orchestrator.update_base_url(Some("attendance.local".to_string())).is_err());
        orchestrator.update_base_url(None).unwrap();

        let ForceOutcome::Completed(report) = orchestrator.force_pull().await else {
            panic!("expected a completed pull");
        };
        assert_eq!(report.failures().count(), KINDS);
        assert!(report.failures().all(|(_, error)| matches!(
            error,
            PullError::Transport(TransportError::NotConfigured)
        )));
    }

    #[tokio::test]
    async fn forced_operations_require_connectivity() {
        let store = store(false);
        let (orchestrator, transport) = orchestrator(&store);
        let queued = enqueue(&store, 1);

        assert_eq!(orchestrator.force_push().await.unwrap(), ForceOutcome::Offline);
        assert!(matches!(orchestrator.force_pull().await, ForceOutcome::Offline));
        assert_eq!(
            orchestrator.force_push_record(queued.local_id).await.unwrap(),
            ForceOutcome::Offline
        );
        assert_eq!(transport.submission_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn assumed_connectivity_runs_only_the_forced_operation() {
        let store = store(false);
        let (orchestrator, transport) = orchestrator(&store);
        enqueue(&store, 1);

        orchestrator.assume_online();
        assert!(orchestrator.is_online());
        assert!(matches!(
            orchestrator.force_pull().await,
            ForceOutcome::Completed(_)
        ));

        tokio::time::sleep(SyncConfig::default().reconnect_cooldown * 2).await;
        settle(|| false).await;

        assert_eq!(transport.submission_count(), 0);
        assert_eq!(store.list_pending(50).unwrap().len(), 1);
        assert!(!store.read_metadata().unwrap().is_online);
        assert_eq!(orchestrator.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn force_push_record_bypasses_definitive_flag() {
        let store = store(true);
        let (orchestrator, transport) = orchestrator(&store);
        let queued = enqueue(&store, 1);
        store
            .mark_error(queued.local_id, "DUPLICADO", FailureClass::Definitive)
            .unwrap();

        let outcome = orchestrator.force_push_record(queued.local_id).await.unwrap();

        let ForceOutcome::Completed(PushOutcome::Completed(report)) = outcome else {
            panic!("expected a completed push");
        };
        assert_eq!(report.synced, 1);
        assert_eq!(transport.submission_count(), 1);
        assert!(store.read_metadata().unwrap().last_push_at.is_some());
    }

    #[tokio::test]
    async fn force_pull_refreshes_cache() {
        let store = store(true);
        let (orchestrator, transport) = orchestrator(&store);
        transport.set_reference(
            crate::models::ReferenceKind::Employee,
            vec![serde_json::json!({"id": 1})],
        );

        let ForceOutcome::Completed(report) = orchestrator.force_pull().await else {
            panic!("expected a completed pull");
        };
        assert!(report.is_complete());
        assert!(store.read_metadata().unwrap().last_pull_at.is_some());
        assert_eq!(
            store
                .snapshot_count(crate::models::ReferenceKind::Employee)
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_submission() {
        let store = store(true);
        let (orchestrator, transport) = orchestrator(&store);
        let queued = enqueue(&store, 1);
        let gate = transport.gate();

        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.perform_sync(SyncReason::Manual).await })
        };
        gate.entered.notified().await;
        orchestrator.shutdown();

        let SyncOutcome::Completed(report) = running.await.unwrap() else {
            panic!("expected a completed cycle");
        };
        let failure = report.push.report().unwrap().failure.clone().unwrap();
        assert_eq!(failure.error, TransportError::Cancelled);

        let event = store.get_event(queued.local_id).unwrap().unwrap();
        assert_eq!(event.sync_status, RecordStatus::Error);
        assert!(event.is_eligible_for_push());
    }

    #[tokio::test]
    async fn enqueue_while_sync_runs_is_not_blocked() {
        let store = store(true);
        let (orchestrator, transport) = orchestrator(&store);
        enqueue(&store, 1);
        let gate = transport.gate();

        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.perform_sync(SyncReason::Manual).await })
        };
        gate.entered.notified().await;
        let late = enqueue(&store, 2);
        gate.release.notify_one();
        running.await.unwrap();

        let pending = store.list_pending(50).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_id, late.local_id);
    }
}
