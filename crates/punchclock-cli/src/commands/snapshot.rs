use punchclock_core::ReferenceKind;

use crate::commands::common::{format_snapshot_lines, CommandContext};
use crate::error::CliError;

pub fn run_snapshot(
    kind: ReferenceKind,
    limit: usize,
    as_json: bool,
    context: &CommandContext,
) -> Result<(), CliError> {
    let store = context.open_store()?;
    let entries = store.read_snapshot(kind, limit)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No cached {kind} rows. Run `punchclock pull` while online.");
        return Ok(());
    }
    for line in format_snapshot_lines(&entries) {
        println!("{line}");
    }
    println!("{} of {} {kind} rows", entries.len(), store.snapshot_count(kind)?);
    Ok(())
}
