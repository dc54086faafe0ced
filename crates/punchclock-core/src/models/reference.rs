//! Reference snapshot model

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kind of server-owned reference data cached on the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Employee,
    Credential,
    Schedule,
    Tolerance,
    Department,
}

impl ReferenceKind {
    /// Every kind, in pull order
    pub const ALL: [Self; 5] = [
        Self::Employee,
        Self::Credential,
        Self::Schedule,
        Self::Tolerance,
        Self::Department,
    ];

    /// Value stored in the `kind` column
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Credential => "credential",
            Self::Schedule => "schedule",
            Self::Tolerance => "tolerance",
            Self::Department => "department",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "employee" | "employees" => Ok(Self::Employee),
            "credential" | "credentials" => Ok(Self::Credential),
            "schedule" | "schedules" => Ok(Self::Schedule),
            "tolerance" | "tolerances" => Ok(Self::Tolerance),
            "department" | "departments" => Ok(Self::Department),
            other => Err(format!("unknown reference kind '{other}'")),
        }
    }
}

/// Locally cached projection of one server-owned entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub kind: ReferenceKind,
    /// Server identifier; upserts are keyed by `(kind, server_id)`
    pub server_id: String,
    /// Row exactly as served
    pub payload: Value,
    /// When this row was last refreshed (Unix ms)
    pub fetched_at: i64,
}

impl ReferenceEntry {
    /// Build an entry from a served JSON row.
    ///
    /// Returns `None` when the row has no usable `id` field.
    pub fn from_row(kind: ReferenceKind, payload: Value, fetched_at: i64) -> Option<Self> {
        let server_id = match payload.get("id")? {
            Value::String(id) if !id.trim().is_empty() => id.trim().to_string(),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };
        Some(Self {
            kind,
            server_id,
            payload,
            fetched_at,
        })
    }

    /// Decode the payload into a typed structure
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_row_accepts_numeric_and_string_ids() {
        let numeric =
            ReferenceEntry::from_row(ReferenceKind::Employee, json!({"id": 14}), 1).unwrap();
        assert_eq!(numeric.server_id, "14");

        let text =
            ReferenceEntry::from_row(ReferenceKind::Credential, json!({"id": " abc "}), 1).unwrap();
        assert_eq!(text.server_id, "abc");
    }

    #[test]
    fn from_row_rejects_rows_without_id() {
        assert!(ReferenceEntry::from_row(ReferenceKind::Schedule, json!({"name": "x"}), 1).is_none());
        assert!(ReferenceEntry::from_row(ReferenceKind::Schedule, json!({"id": null}), 1).is_none());
        assert!(ReferenceEntry::from_row(ReferenceKind::Schedule, json!({"id": ""}), 1).is_none());
    }

    #[test]
    fn decode_reads_typed_fields() {
        #[derive(Deserialize)]
        struct Tolerance {
            id: i64,
            minutos_retardo: u32,
        }

        let entry = ReferenceEntry::from_row(
            ReferenceKind::Tolerance,
            json!({"id": 2, "minutos_retardo": 10, "extra": true}),
            1,
        )
        .unwrap();
        let tolerance: Tolerance = entry.decode().unwrap();
        assert_eq!(tolerance.id, 2);
        assert_eq!(tolerance.minutos_retardo, 10);
    }

    #[test]
    fn kind_parses_plural_names() {
        assert_eq!(
            "Departments".parse::<ReferenceKind>().unwrap(),
            ReferenceKind::Department
        );
        assert!("devices".parse::<ReferenceKind>().is_err());
    }
}
