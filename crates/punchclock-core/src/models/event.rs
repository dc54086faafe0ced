//! Queued attendance event model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Locally assigned, monotonically increasing identifier of a queued event.
///
/// Backed by the store's `AUTOINCREMENT` rowid, so a value is never reused even
/// after rows are superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(i64);

impl LocalId {
    /// Wrap a raw store identifier
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw integer value
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Stable identity of an event on the wire, generated once at creation.
///
/// Uses UUID v7 so keys sort by creation time. The server deduplicates
/// repeated submissions carrying the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Generate a fresh key
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this key
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for IdempotencyKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of an attendance action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Clock-in
    Entry,
    /// Clock-out
    Exit,
}

impl EventType {
    /// Value stored locally
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
        }
    }

    /// Value sent in the `tipo` wire field
    #[must_use]
    pub const fn wire_value(self) -> &'static str {
        match self {
            Self::Entry => "entrada",
            Self::Exit => "salida",
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entry" | "entrada" | "in" => Ok(Self::Entry),
            "exit" | "salida" | "out" => Ok(Self::Exit),
            other => Err(format!("unknown event type '{other}'")),
        }
    }
}

/// Upload state of a queued event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Awaiting upload
    Pending,
    /// Accepted by the server; immutable from here on
    Synced,
    /// Last attempt failed; see `is_definitive_error`
    Error,
}

impl SyncStatus {
    /// Value stored in the `sync_status` column
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

/// How a failed submission must be treated by later cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Transient; picked up again by the next push cycle
    Retriable,
    /// Rejected for credentials; held back until a fresh token arrives
    AuthRequired,
    /// Never retried automatically
    Definitive,
}

impl FailureClass {
    /// Whether the record becomes terminal
    #[must_use]
    pub const fn is_definitive(self) -> bool {
        matches!(self, Self::Definitive)
    }

    /// Whether the record waits for re-authentication
    #[must_use]
    pub const fn is_auth_blocked(self) -> bool {
        matches!(self, Self::AuthRequired)
    }
}

/// An attendance action handed over by the capture subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Server identifier of the employee
    pub employee_ref: i64,
    /// Entry or exit
    pub event_type: EventType,
    /// Business classification (e.g. `normal`, `extra`)
    pub classification: String,
    /// Department the action is attributed to, when known
    pub department_ref: Option<i64>,
    /// How the employee was identified (e.g. `biometric`, `pin`)
    pub capture_method: String,
    /// Terminal that captured the action
    pub origin_device: String,
    /// Attendance state computed at capture time (e.g. `on_time`, `late`)
    pub attendance_state: Option<String>,
    /// Free-form location label
    pub location: Option<String>,
    /// Capture timestamp (Unix ms)
    pub captured_at: i64,
}

impl NewEvent {
    /// Create an event captured now with default classification and method
    #[must_use]
    pub fn new(employee_ref: i64, event_type: EventType, origin_device: impl Into<String>) -> Self {
        Self {
            employee_ref,
            event_type,
            classification: "normal".to_string(),
            department_ref: None,
            capture_method: "biometric".to_string(),
            origin_device: origin_device.into(),
            attendance_state: None,
            location: None,
            captured_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[must_use]
    pub fn with_classification(mut self, classification: impl Into<String>) -> Self {
        self.classification = classification.into();
        self
    }

    #[must_use]
    pub const fn with_department(mut self, department_ref: i64) -> Self {
        self.department_ref = Some(department_ref);
        self
    }

    #[must_use]
    pub fn with_capture_method(mut self, method: impl Into<String>) -> Self {
        self.capture_method = method.into();
        self
    }

    #[must_use]
    pub fn with_attendance_state(mut self, state: impl Into<String>) -> Self {
        self.attendance_state = Some(state.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub const fn captured_at(mut self, timestamp_ms: i64) -> Self {
        self.captured_at = timestamp_ms;
        self
    }
}

/// One attendance action awaiting (or having received) server confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub local_id: LocalId,
    pub idempotency_key: IdempotencyKey,
    pub employee_ref: i64,
    pub event_type: EventType,
    pub classification: String,
    pub department_ref: Option<i64>,
    pub capture_method: String,
    pub origin_device: String,
    pub attendance_state: Option<String>,
    pub location: Option<String>,
    /// Capture timestamp (Unix ms)
    pub captured_at: i64,
    pub sync_status: SyncStatus,
    /// Set exactly once, when the server accepts the record
    pub server_id: Option<String>,
    pub last_error: Option<String>,
    pub is_definitive_error: bool,
    /// Held back until credentials are refreshed
    pub auth_blocked: bool,
    /// Number of resubmissions after a failed attempt
    pub retry_count: u32,
    /// Enqueue timestamp (Unix ms)
    pub created_at: i64,
    /// Last status change (Unix ms)
    pub updated_at: i64,
}

impl QueuedEvent {
    /// Whether a later push cycle will pick this record up on its own
    #[must_use]
    pub const fn is_eligible_for_push(&self) -> bool {
        match self.sync_status {
            SyncStatus::Pending => true,
            SyncStatus::Error => !self.is_definitive_error && !self.auth_blocked,
            SyncStatus::Synced => false,
        }
    }

    /// Identity sent in the wire `id` field
    #[must_use]
    pub fn wire_id(&self) -> String {
        if self.idempotency_key.as_str().trim().is_empty() {
            self.local_id.to_string()
        } else {
            self.idempotency_key.as_str().to_string()
        }
    }
}

/// Live queue counters, recomputed from the store on every read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Records in `pending`
    pub pending: usize,
    /// Records in `error` that will be retried
    pub retriable: usize,
    /// Records in `error` waiting for a fresh token
    pub auth_blocked: usize,
    /// Records in terminal `error`
    pub definitive: usize,
    /// Records confirmed by the server
    pub synced: usize,
}

impl QueueCounts {
    /// All records in `error`, whatever their class
    #[must_use]
    pub const fn errors(&self) -> usize {
        self.retriable + self.auth_blocked + self.definitive
    }
}
