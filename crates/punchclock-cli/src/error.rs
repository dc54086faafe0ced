use std::io;

use punchclock_core::config::ConfigError;
use punchclock_core::sync::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] punchclock_core::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid local ID: {0}")]
    InvalidLocalId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync failed: {0}")]
    SyncFailed(String),
    #[error("Terminal is offline; nothing was sent")]
    Offline,
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),
    #[error(
        "Server is not configured. Run `punchclock config init --api-base-url <URL>` or set PUNCHCLOCK_API_URL."
    )]
    ServerNotConfigured,
}
