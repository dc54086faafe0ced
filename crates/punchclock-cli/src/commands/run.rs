use std::time::Duration;

use punchclock_core::{SyncOrchestrator, SyncStatus};

use crate::commands::common::CommandContext;
use crate::error::CliError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run_daemon(probe_interval_secs: u64, context: &CommandContext) -> Result<(), CliError> {
    let config = context.sync_config()?;
    let base_url = config
        .base_url
        .clone()
        .ok_or(CliError::ServerNotConfigured)?;
    let orchestrator = SyncOrchestrator::new(context.open_store()?, &config)?;
    let probe_client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .map_err(|error| CliError::Config(format!("Failed to build probe client: {error}")))?;

    let mut status = orchestrator.subscribe();
    let reporter = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            println!("{}", format_status_line(&snapshot));
        }
    });

    orchestrator.set_online_status(probe(&probe_client, &base_url).await);
    orchestrator.start_periodic_sync();
    println!(
        "Syncing with {base_url} every {}s; press Ctrl-C to stop",
        config.sync_interval.as_secs()
    );

    let mut probe_timer = tokio::time::interval(Duration::from_secs(probe_interval_secs.max(1)));
    probe_timer.tick().await;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            _ = probe_timer.tick() => {
                orchestrator.set_online_status(probe(&probe_client, &base_url).await);
            }
        }
    }

    orchestrator.shutdown();
    reporter.abort();
    println!("Stopped");
    Ok(())
}

/// Any HTTP answer from the server counts as reachable.
async fn probe(client: &reqwest::Client, base_url: &str) -> bool {
    match client.get(base_url).send().await {
        Ok(_) => true,
        Err(error) => {
            tracing::debug!("Connectivity probe failed: {}", error);
            false
        }
    }
}

pub fn format_status_line(status: &SyncStatus) -> String {
    let mut line = format!(
        "[{}] {} pending={} errors={}",
        status.state,
        if status.is_online { "online" } else { "offline" },
        status.pending,
        status.errors
    );
    if status.full_resync {
        line.push_str(" full-resync");
    }
    if status.needs_reauth {
        line.push_str(" needs-reauth");
    }
    if let Some(error) = &status.last_error {
        line.push_str(" last_error=");
        line.push_str(error);
    }
    line
}
