//! Punchclock CLI - attendance capture terminal tooling
//!
//! Queue events offline, inspect the local store and drive the sync engine.

mod cli;
mod commands;
mod config_profiles;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::{resolve_db_path, CommandContext};
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::queue::run_queue;
use crate::commands::record::{run_record, RecordArgs};
use crate::commands::run::run_daemon;
use crate::commands::snapshot::run_snapshot;
use crate::commands::status::run_status;
use crate::commands::sync::{run_pull, run_push, run_retry, run_sync};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("punchclock=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let context = CommandContext {
        db_path: resolve_db_path(cli.db_path)?,
        profile: cli.profile,
    };

    match cli.command {
        Commands::Record {
            employee,
            event_type,
            classification,
            department,
            method,
            state,
            location,
        } => run_record(
            RecordArgs {
                employee,
                event_type,
                classification,
                department,
                method,
                state,
                location,
            },
            &context,
        )?,
        Commands::Queue {
            status,
            limit,
            json,
        } => run_queue(status, limit, json, &context)?,
        Commands::Status { json } => run_status(json, &context)?,
        Commands::Sync => run_sync(&context).await?,
        Commands::Pull => run_pull(&context).await?,
        Commands::Push => run_push(&context).await?,
        Commands::Retry { local_id, reset } => run_retry(&local_id, reset, &context).await?,
        Commands::Snapshot { kind, limit, json } => {
            run_snapshot(kind.into(), limit, json, &context)?;
        }
        Commands::Run {
            probe_interval_secs,
        } => run_daemon(probe_interval_secs, &context).await?,
        Commands::Config { command } => run_config(command, context.profile.as_deref())?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
