//! Shared services used across clients.

mod store;

pub use store::SyncStore;
