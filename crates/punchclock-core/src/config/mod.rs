//! Runtime configuration for the sync engine.
//!
//! `SyncConfig` carries the server location, credential, wire paths and the
//! timing constants of the orchestrator. Terminals usually build it from the
//! environment with [`SyncConfig::from_env`] and then override fields from the
//! CLI profile.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::models::ReferenceKind;
use crate::util::{is_http_url, normalize_text_option};

/// Environment variables read by [`SyncConfig::from_env`]
pub const ENV_API_URL: &str = "PUNCHCLOCK_API_URL";
pub const ENV_API_TOKEN: &str = "PUNCHCLOCK_API_TOKEN";
pub const ENV_DEVICE_ID: &str = "PUNCHCLOCK_DEVICE_ID";
pub const ENV_SYNC_INTERVAL_SECS: &str = "PUNCHCLOCK_SYNC_INTERVAL_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "PUNCHCLOCK_REQUEST_TIMEOUT_SECS";
pub const ENV_BATCH_SIZE: &str = "PUNCHCLOCK_BATCH_SIZE";

/// Largest batch the server accepts per submission
pub const MAX_BATCH_SIZE: usize = 50;
/// Shortest periodic sync interval accepted
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_RECONNECT_COOLDOWN: Duration = Duration::from_secs(3);
const DEFAULT_FULL_RESYNC_THRESHOLD: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server paths, relative to the base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEndpoints {
    pub employees: String,
    pub credentials: String,
    pub schedules: String,
    pub tolerances: String,
    pub departments: String,
    /// Batch submission of queued events
    pub pending_submission: String,
}

impl Default for SyncEndpoints {
    fn default() -> Self {
        Self {
            employees: "/api/sync/empleados".to_string(),
            credentials: "/api/sync/credenciales".to_string(),
            schedules: "/api/sync/horarios".to_string(),
            tolerances: "/api/sync/tolerancias".to_string(),
            departments: "/api/sync/departamentos".to_string(),
            pending_submission: "/api/sync/registros-pendientes".to_string(),
        }
    }
}

impl SyncEndpoints {
    /// Reference path for a kind
    pub fn reference_path(&self, kind: ReferenceKind) -> &str {
        match kind {
            ReferenceKind::Employee => &self.employees,
            ReferenceKind::Credential => &self.credentials,
            ReferenceKind::Schedule => &self.schedules,
            ReferenceKind::Tolerance => &self.tolerances,
            ReferenceKind::Department => &self.departments,
        }
    }
}

/// Configuration for the pull/push components and the orchestrator
#[derive(Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Server base URL (e.g. `https://attendance.example.com`)
    pub base_url: Option<String>,
    /// Bearer token sent on every request
    pub auth_token: Option<String>,
    /// Identifier stamped on captured events as `origin_device`
    pub device_id: String,
    pub endpoints: SyncEndpoints,
    /// Upper bound for every network call (default: 30 seconds)
    pub request_timeout: Duration,
    /// Records per push (default and maximum: 50)
    pub batch_size: usize,
    /// Periodic sync interval (default: 5 minutes)
    pub sync_interval: Duration,
    /// Delay before resyncing after connectivity returns (default: 3 seconds)
    pub reconnect_cooldown: Duration,
    /// Offline duration after which a resync is flagged as full (default: 30 minutes)
    pub full_resync_threshold: Duration,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncConfig")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("device_id", &self.device_id)
            .field("endpoints", &self.endpoints)
            .field("request_timeout", &self.request_timeout)
            .field("batch_size", &self.batch_size)
            .field("sync_interval", &self.sync_interval)
            .field("reconnect_cooldown", &self.reconnect_cooldown)
            .field("full_resync_threshold", &self.full_resync_threshold)
            .finish()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            auth_token: None,
            device_id: "terminal".to_string(),
            endpoints: SyncEndpoints::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            batch_size: MAX_BATCH_SIZE,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            reconnect_cooldown: DEFAULT_RECONNECT_COOLDOWN,
            full_resync_threshold: DEFAULT_FULL_RESYNC_THRESHOLD,
        }
    }
}

impl SyncConfig {
    /// Create a configuration pointing at a server
    pub fn new(base_url: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: Some(normalize_base_url(base_url.into())?),
            ..Self::default()
        })
    }

    /// Load configuration from `PUNCHCLOCK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = normalize_text_option(lookup(ENV_API_URL)) {
            config.base_url = Some(normalize_base_url(url)?);
        }
        config.auth_token = normalize_text_option(lookup(ENV_API_TOKEN));
        if let Some(device_id) = normalize_text_option(lookup(ENV_DEVICE_ID)) {
            config.device_id = device_id;
        }
        if let Some(secs) = parse_number(&lookup, ENV_SYNC_INTERVAL_SECS)? {
            config.sync_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_number(&lookup, ENV_REQUEST_TIMEOUT_SECS)? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parse_number(&lookup, ENV_BATCH_SIZE)? {
            config = config.with_batch_size(usize::try_from(size).unwrap_or(MAX_BATCH_SIZE));
        }

        Ok(config)
    }

    /// Set the bearer token
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = normalize_text_option(Some(token.into()));
        self
    }

    #[must_use]
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Set the batch size, clamped to `1..=50`
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the periodic sync interval, raised to at least [`MIN_SYNC_INTERVAL`]
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = if interval.as_nanos() < MIN_SYNC_INTERVAL.as_nanos() {
            MIN_SYNC_INTERVAL
        } else {
            interval
        };
        self
    }

    #[must_use]
    pub const fn with_reconnect_cooldown(mut self, cooldown: Duration) -> Self {
        self.reconnect_cooldown = cooldown;
        self
    }

    #[must_use]
    pub const fn with_full_resync_threshold(mut self, threshold: Duration) -> Self {
        self.full_resync_threshold = threshold;
        self
    }

    /// Check if a server is configured
    pub const fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }
}

/// Validate and normalize a server base URL
pub fn normalize_base_url(raw: String) -> Result<String, ConfigError> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| ConfigError::Invalid("base URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(ConfigError::Invalid(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}

fn parse_number(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = normalize_text_option(lookup(name)) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid(format!("{name} must be greater than zero"))),
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(ConfigError::Invalid(format!(
            "{name} must be a positive integer, got '{raw}'"
        ))),
    }
}
