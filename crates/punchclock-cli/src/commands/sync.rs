use punchclock_core::sync::SkipReason;
use punchclock_core::{LocalId, SyncOrchestrator, SyncOutcome, SyncReason};

use crate::commands::common::{
    format_pull_report, format_push_outcome, require_online, CommandContext,
};
use crate::error::CliError;

/// Orchestrator for a one-shot command; the operator vouches for connectivity.
///
/// The persisted connectivity flag is left alone, so no reconnect cycle
/// starts behind the forced operation.
fn online_orchestrator(context: &CommandContext) -> Result<SyncOrchestrator, CliError> {
    let orchestrator = context.connected_orchestrator()?;
    orchestrator.assume_online();
    Ok(orchestrator)
}

pub async fn run_sync(context: &CommandContext) -> Result<(), CliError> {
    let orchestrator = context.connected_orchestrator()?;
    let outcome = orchestrator.perform_sync(SyncReason::Initial).await;
    orchestrator.shutdown();

    match outcome {
        SyncOutcome::Completed(report) => {
            for line in format_pull_report(&report.pull) {
                println!("{line}");
            }
            println!("{}", format_push_outcome(&report.push));
            match report.error_summary() {
                Some(error) => println!("Sync finished with errors: {error}"),
                None => println!("Sync completed"),
            }
            Ok(())
        }
        SyncOutcome::Skipped(SkipReason::Busy) => {
            println!("A sync is already running");
            Ok(())
        }
        SyncOutcome::Skipped(SkipReason::Offline) => {
            println!("Terminal is offline; sync skipped");
            Ok(())
        }
        SyncOutcome::Failed(message) => Err(CliError::SyncFailed(message)),
    }
}

pub async fn run_pull(context: &CommandContext) -> Result<(), CliError> {
    let orchestrator = online_orchestrator(context)?;
    let outcome = orchestrator.force_pull().await;
    orchestrator.shutdown();

    let report = require_online(outcome)?;
    for line in format_pull_report(&report) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_push(context: &CommandContext) -> Result<(), CliError> {
    let orchestrator = online_orchestrator(context)?;
    let outcome = orchestrator.force_push().await;
    orchestrator.shutdown();

    println!("{}", format_push_outcome(&require_online(outcome?)?));
    Ok(())
}

pub async fn run_retry(
    local_id: &str,
    reset: bool,
    context: &CommandContext,
) -> Result<(), CliError> {
    let id = parse_local_id(local_id)?;
    let orchestrator = online_orchestrator(context)?;

    if reset {
        if orchestrator.store().reset_for_retry(id)? {
            println!("Event #{id} reset to pending");
        } else {
            println!("Event #{id} was not in error; nothing to reset");
        }
    }

    let outcome = orchestrator.force_push_record(id).await;
    orchestrator.shutdown();

    println!("{}", format_push_outcome(&require_online(outcome?)?));
    Ok(())
}

pub fn parse_local_id(raw: &str) -> Result<LocalId, CliError> {
    raw.trim()
        .trim_start_matches('#')
        .parse::<LocalId>()
        .map_err(|_| CliError::InvalidLocalId(raw.to_string()))
}
