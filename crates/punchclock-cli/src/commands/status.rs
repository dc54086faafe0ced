use punchclock_core::SyncStatus;

use crate::commands::common::{format_counts, format_sync_timestamp, CommandContext};
use crate::error::CliError;

pub fn run_status(as_json: bool, context: &CommandContext) -> Result<(), CliError> {
    let config = context.sync_config()?;
    let store = context.open_store()?;
    let orchestrator = punchclock_core::SyncOrchestrator::new(store.clone(), &config)?;
    let status = orchestrator.status()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    for line in format_status_lines(&status) {
        println!("{line}");
    }
    println!("queue: {}", format_counts(&store.counts()?));
    match &config.base_url {
        Some(url) => println!("server: {url}"),
        None => println!("server: not configured"),
    }
    if let Some(path) = store.path() {
        println!("database: {}", path.display());
    }
    Ok(())
}

pub fn format_status_lines(status: &SyncStatus) -> Vec<String> {
    let mut lines = vec![
        format!(
            "state: {}{}",
            status.state,
            if status.is_online { "" } else { " (offline)" }
        ),
        format!(
            "last sync: {}",
            status
                .last_sync
                .map_or_else(|| "never".to_string(), format_sync_timestamp)
        ),
        format!("pending: {}  errors: {}", status.pending, status.errors),
    ];
    if let Some(error) = &status.last_error {
        lines.push(format!("last error: {error}"));
    }
    if status.needs_reauth {
        lines.push("server rejected the API token; set a new PUNCHCLOCK_API_TOKEN".to_string());
    }
    lines
}
