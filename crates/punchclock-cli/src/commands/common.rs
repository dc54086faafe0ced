use std::env;
use std::path::PathBuf;

use chrono::Utc;
use punchclock_core::models::{QueueCounts, ReferenceEntry};
use punchclock_core::sync::{ForceOutcome, PullReport, PushOutcome, PushReport};
use punchclock_core::util::compact_text;
use punchclock_core::{QueuedEvent, SyncConfig, SyncOrchestrator, SyncStore};
use serde::Serialize;

use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

/// Everything a command needs to reach the store and the server
pub struct CommandContext {
    pub db_path: PathBuf,
    pub profile: Option<String>,
}

impl CommandContext {
    pub fn open_store(&self) -> Result<SyncStore, CliError> {
        Ok(SyncStore::open_path(&self.db_path)?)
    }

    pub fn sync_config(&self) -> Result<SyncConfig, CliError> {
        let profiles = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = profiles.resolve_profile_name(self.profile.as_deref());
        let profile = profiles.profile(&profile_name).cloned().unwrap_or_default();
        resolve_sync_config(|name| {
            env::var(name)
                .ok()
                .or_else(|| profile.env_fallback(name))
        })
    }

    /// Orchestrator for commands that talk to the server
    pub fn connected_orchestrator(&self) -> Result<SyncOrchestrator, CliError> {
        let config = self.sync_config()?;
        if !config.is_configured() {
            return Err(CliError::ServerNotConfigured);
        }
        Ok(SyncOrchestrator::new(self.open_store()?, &config)?)
    }
}

pub fn resolve_sync_config(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SyncConfig, CliError> {
    Ok(SyncConfig::from_lookup(lookup)?)
}

#[derive(Debug, Serialize)]
pub struct QueueItem {
    pub local_id: i64,
    pub idempotency_key: String,
    pub employee: i64,
    pub event_type: &'static str,
    pub status: &'static str,
    pub captured_at: i64,
    pub captured_at_iso: String,
    pub server_id: Option<String>,
    pub last_error: Option<String>,
    pub definitive: bool,
    pub auth_blocked: bool,
    pub retry_count: u32,
}

pub fn event_to_item(event: &QueuedEvent) -> QueueItem {
    QueueItem {
        local_id: event.local_id.get(),
        idempotency_key: event.idempotency_key.to_string(),
        employee: event.employee_ref,
        event_type: event.event_type.as_str(),
        status: event.sync_status.as_str(),
        captured_at: event.captured_at,
        captured_at_iso: format_sync_timestamp(event.captured_at),
        server_id: event.server_id.clone(),
        last_error: event.last_error.clone(),
        definitive: event.is_definitive_error,
        auth_blocked: event.auth_blocked,
        retry_count: event.retry_count,
    }
}

pub fn format_event_lines(events: &[QueuedEvent]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    events
        .iter()
        .map(|event| {
            let id = format!("#{}", event.local_id);
            let relative_time = format_relative_time(event.captured_at, now_ms);
            let status = status_label(event);
            let line = format!(
                "{id:<7}  {:<5}  emp={:<8}  {status:<10}  {relative_time}",
                event.event_type.as_str(),
                event.employee_ref,
            );
            match (&event.server_id, &event.last_error) {
                (Some(server_id), _) => format!("{line}  server={server_id}"),
                (None, Some(error)) => format!("{line}  {}", compact_text(error)),
                (None, None) => line,
            }
        })
        .collect()
}

fn status_label(event: &QueuedEvent) -> &'static str {
    if event.is_definitive_error {
        "rejected"
    } else if event.auth_blocked {
        "auth"
    } else {
        event.sync_status.as_str()
    }
}

pub fn format_counts(counts: &QueueCounts) -> String {
    format!(
        "pending={} retriable={} auth_blocked={} rejected={} synced={}",
        counts.pending, counts.retriable, counts.auth_blocked, counts.definitive, counts.synced
    )
}

pub fn format_snapshot_lines(entries: &[ReferenceEntry]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    entries
        .iter()
        .map(|entry| {
            let payload = entry.payload.to_string();
            let preview = if payload.chars().count() > 60 {
                let mut truncated = payload.chars().take(57).collect::<String>();
                truncated.push_str("...");
                truncated
            } else {
                payload
            };
            format!(
                "{:<10}  {:<8}  {preview}",
                entry.server_id,
                format_relative_time(entry.fetched_at, now_ms)
            )
        })
        .collect()
}

pub fn format_pull_report(report: &PullReport) -> Vec<String> {
    report
        .results
        .iter()
        .map(|(kind, result)| match result {
            Ok(refresh) if refresh.skipped > 0 => format!(
                "{kind:<11} {} rows ({} without id skipped)",
                refresh.stored, refresh.skipped
            ),
            Ok(refresh) => format!("{kind:<11} {} rows", refresh.stored),
            Err(error) => format!("{kind:<11} failed: {error}"),
        })
        .collect()
}

pub fn format_push_outcome(outcome: &PushOutcome) -> String {
    match outcome {
        PushOutcome::Busy => "Another push is already running".to_string(),
        PushOutcome::AlreadySynced(id) => format!("Event #{id} is already synced"),
        PushOutcome::Completed(report) => format_push_report(report),
    }
}

pub fn format_push_report(report: &PushReport) -> String {
    if report.attempted == 0 {
        return "Nothing to push".to_string();
    }
    if let Some(failure) = &report.failure {
        return format!(
            "Push of {} events failed: {} ({} marked for retry)",
            report.attempted, failure.error, failure.marked
        );
    }

    let mut summary = format!(
        "Pushed {} events: {} synced, {} rejected",
        report.attempted,
        report.synced,
        report.rejected_definitive + report.rejected_retriable
    );
    if report.rejected_definitive > 0 {
        summary.push_str(&format!(" ({} definitively)", report.rejected_definitive));
    }
    if report.unanswered > 0 {
        summary.push_str(&format!(", {} unanswered", report.unanswered));
    }
    summary
}

/// Unwrap a forced operation, treating "offline" as an error for one-shot commands
pub fn require_online<T>(outcome: ForceOutcome<T>) -> Result<T, CliError> {
    match outcome {
        ForceOutcome::Completed(value) => Ok(value),
        ForceOutcome::Offline => Err(CliError::Offline),
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("PUNCHCLOCK_DB_PATH").map(PathBuf::from))
    {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("punchclock").join("punchclock.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}
