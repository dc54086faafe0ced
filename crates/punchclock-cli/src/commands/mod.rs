pub mod common;
pub mod completions;
pub mod config;
pub mod queue;
pub mod record;
pub mod run;
pub mod snapshot;
pub mod status;
pub mod sync;
