use crate::cli::QueueFilter;
use crate::commands::common::{
    event_to_item, format_counts, format_event_lines, CommandContext, QueueItem,
};
use crate::error::CliError;

pub fn run_queue(
    filter: QueueFilter,
    limit: usize,
    as_json: bool,
    context: &CommandContext,
) -> Result<(), CliError> {
    let store = context.open_store()?;
    let events = store.list_events(filter.status(), limit)?;

    if as_json {
        let json_items = events.iter().map(event_to_item).collect::<Vec<QueueItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("No queued events.");
    } else {
        for line in format_event_lines(&events) {
            println!("{line}");
        }
    }
    println!("{}", format_counts(&store.counts()?));
    Ok(())
}
