//! Wire shapes of the batch submission endpoint.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::QueuedEvent;

/// Rejection codes that must never be retried automatically
pub const DEFINITIVE_REJECTION_CODES: &[&str] = &[
    // Required fields missing from the record
    "CAMPOS_FALTANTES",
    // Referenced employee does not exist on the server
    "EMPLEADO_NO_ENCONTRADO",
    // Duplicate of an already accepted record
    "DUPLICADO",
];

/// Whether a server rejection code is in the definitive set
pub fn is_definitive_code(code: &str) -> bool {
    let code = code.trim();
    DEFINITIVE_REJECTION_CODES
        .iter()
        .any(|definitive| definitive.eq_ignore_ascii_case(code))
}

/// Body of `POST <pending-submission-path>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub registros: Vec<WireRecord>,
}

impl PushRequest {
    pub fn from_events(events: &[QueuedEvent]) -> Self {
        Self {
            registros: events.iter().map(WireRecord::from).collect(),
        }
    }
}

/// One queued event as the server expects it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    /// Idempotency key, or the local ID when no key exists
    pub id: String,
    pub empleado_id: i64,
    pub tipo: String,
    pub estado: Option<String>,
    pub clasificacion: String,
    pub departamento_id: Option<i64>,
    pub metodo_registro: String,
    pub dispositivo_origen: String,
    pub ubicacion: Option<String>,
    /// RFC 3339 capture timestamp
    pub fecha_registro: String,
}

impl From<&QueuedEvent> for WireRecord {
    fn from(event: &QueuedEvent) -> Self {
        let fecha_registro = chrono::DateTime::from_timestamp_millis(event.captured_at)
            .map_or_else(
                || event.captured_at.to_string(),
                |timestamp| timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            );
        Self {
            id: event.wire_id(),
            empleado_id: event.employee_ref,
            tipo: event.event_type.wire_value().to_string(),
            estado: event.attendance_state.clone(),
            clasificacion: event.classification.clone(),
            departamento_id: event.department_ref,
            metodo_registro: event.capture_method.clone(),
            dispositivo_origen: event.origin_device.clone(),
            ubicacion: event.location.clone(),
            fecha_registro,
        }
    }
}

/// Response of the batch submission endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    #[serde(default)]
    pub sincronizados: Vec<AcceptedRecord>,
    #[serde(default)]
    pub rechazados: Vec<RejectedRecord>,
}

impl PushResponse {
    /// Parse a body only if it actually carries result arrays.
    ///
    /// Used for non-2xx responses, where an unrelated error object must not be
    /// mistaken for an empty result.
    pub fn parse_strict(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        let object = value.as_object()?;
        if !object.contains_key("sincronizados") && !object.contains_key("rechazados") {
            return None;
        }
        serde_json::from_value(value).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedRecord {
    /// Echo of the submitted `id`
    #[serde(deserialize_with = "string_or_number")]
    pub id_local: String,
    #[serde(deserialize_with = "string_or_number")]
    pub id_servidor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// Echo of the submitted `id`
    #[serde(deserialize_with = "string_or_number")]
    pub id_local: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub codigo: Option<String>,
}

impl RejectedRecord {
    /// Human-readable reason stored on the record
    pub fn message(&self) -> String {
        let error = self.error.as_deref().map(str::trim).filter(|e| !e.is_empty());
        let code = self.codigo.as_deref().map(str::trim).filter(|c| !c.is_empty());
        match (code, error) {
            (Some(code), Some(error)) => format!("{code}: {error}"),
            (Some(code), None) => code.to_string(),
            (None, Some(error)) => error.to_string(),
            (None, None) => "rejected by server".to_string(),
        }
    }

    pub fn is_definitive(&self) -> bool {
        self.codigo.as_deref().is_some_and(is_definitive_code)
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(D::Error::custom(format!(
            "expected string or number identifier, got {other}"
        ))),
    }
}
