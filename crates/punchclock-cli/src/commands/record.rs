use punchclock_core::{NewEvent, QueuedEvent, SyncStore};

use crate::cli::EventTypeArg;
use crate::commands::common::CommandContext;
use crate::config_profiles::normalize_text_option;
use crate::error::CliError;

/// Event fields as given on the command line
pub struct RecordArgs {
    pub employee: i64,
    pub event_type: EventTypeArg,
    pub classification: String,
    pub department: Option<i64>,
    pub method: String,
    pub state: Option<String>,
    pub location: Option<String>,
}

pub fn run_record(args: RecordArgs, context: &CommandContext) -> Result<(), CliError> {
    let config = context.sync_config()?;
    let store = context.open_store()?;
    let queued = record_event(&store, args, &config.device_id)?;
    println!(
        "Queued {} #{} for employee {} ({})",
        queued.event_type.as_str(),
        queued.local_id,
        queued.employee_ref,
        queued.idempotency_key
    );
    Ok(())
}

pub fn record_event(
    store: &SyncStore,
    args: RecordArgs,
    device_id: &str,
) -> Result<QueuedEvent, CliError> {
    let mut event = NewEvent::new(args.employee, args.event_type.into(), device_id);
    if let Some(classification) = normalize_text_option(Some(args.classification)) {
        event = event.with_classification(classification);
    }
    if let Some(method) = normalize_text_option(Some(args.method)) {
        event = event.with_capture_method(method);
    }
    if let Some(department) = args.department {
        event = event.with_department(department);
    }
    if let Some(state) = normalize_text_option(args.state) {
        event = event.with_attendance_state(state);
    }
    if let Some(location) = normalize_text_option(args.location) {
        event = event.with_location(location);
    }
    Ok(store.enqueue(&event)?)
}
