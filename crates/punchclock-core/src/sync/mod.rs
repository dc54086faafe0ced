//! Sync engine: transport seam, pull/push components and the orchestrator.

mod orchestrator;
mod pull;
mod push;
mod status;
mod transport;
pub mod wire;

#[cfg(test)]
pub(crate) mod test_support;

pub use orchestrator::{
    CycleReport, ForceOutcome, SkipReason, SyncOrchestrator, SyncOutcome, SyncReason,
};
pub use pull::{KindRefresh, PullComponent, PullError, PullReport};
pub use push::{BatchFailure, PushComponent, PushOutcome, PushReport};
pub use status::{SyncState, SyncStatus};
pub use transport::{
    ApiCredentials, HttpTransport, SyncTransport, TransportError, TransportFuture,
    TransportResult,
};
