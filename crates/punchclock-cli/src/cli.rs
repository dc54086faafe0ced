use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use punchclock_core::models::SyncStatus;
use punchclock_core::{EventType, ReferenceKind};

#[derive(Parser)]
#[command(name = "punchclock")]
#[command(about = "Offline-first attendance capture and sync from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name holding the server configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue an attendance event (works offline)
    #[command(alias = "punch")]
    Record {
        /// Server ID of the employee
        #[arg(long, value_name = "ID")]
        employee: i64,
        /// Entry or exit
        #[arg(long = "type", value_enum, value_name = "TYPE")]
        event_type: EventTypeArg,
        /// Event classification
        #[arg(long, default_value = "normal")]
        classification: String,
        /// Server ID of the department
        #[arg(long, value_name = "ID")]
        department: Option<i64>,
        /// Capture method
        #[arg(long, default_value = "biometric")]
        method: String,
        /// Attendance state (e.g. on_time, late)
        #[arg(long)]
        state: Option<String>,
        /// Free-form location
        #[arg(long)]
        location: Option<String>,
    },
    /// List queued events
    Queue {
        /// Filter by sync status
        #[arg(long, value_enum, default_value_t = QueueFilter::All)]
        status: QueueFilter,
        /// Number of events to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync state and queue counters
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one pull then push cycle
    Sync,
    /// Refresh the reference data cache
    Pull,
    /// Upload pending events
    Push,
    /// Push one queued event now
    Retry {
        /// Local ID of the event
        local_id: String,
        /// Clear a definitive or auth error first
        #[arg(long)]
        reset: bool,
    },
    /// Show cached reference data
    Snapshot {
        /// Reference kind
        #[arg(value_enum)]
        kind: ReferenceKindArg,
        /// Number of rows to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the foreground until interrupted
    Run {
        /// Seconds between connectivity probes
        #[arg(long, default_value = "15", value_name = "SECS")]
        probe_interval_secs: u64,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum EventTypeArg {
    Entry,
    Exit,
}

impl From<EventTypeArg> for EventType {
    fn from(value: EventTypeArg) -> Self {
        match value {
            EventTypeArg::Entry => Self::Entry,
            EventTypeArg::Exit => Self::Exit,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum QueueFilter {
    Pending,
    Error,
    Synced,
    All,
}

impl QueueFilter {
    pub const fn status(self) -> Option<SyncStatus> {
        match self {
            Self::Pending => Some(SyncStatus::Pending),
            Self::Error => Some(SyncStatus::Error),
            Self::Synced => Some(SyncStatus::Synced),
            Self::All => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ReferenceKindArg {
    Employees,
    Credentials,
    Schedules,
    Tolerances,
    Departments,
}

impl From<ReferenceKindArg> for ReferenceKind {
    fn from(value: ReferenceKindArg) -> Self {
        match value {
            ReferenceKindArg::Employees => Self::Employee,
            ReferenceKindArg::Credentials => Self::Credential,
            ReferenceKindArg::Schedules => Self::Schedule,
            ReferenceKindArg::Tolerances => Self::Tolerance,
            ReferenceKindArg::Departments => Self::Department,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update a profile
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Attendance server base URL
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Identifier stamped on events captured by this terminal
        #[arg(long, value_name = "ID")]
        device_id: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Show configured profiles
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Make a profile the active one
    Use {
        /// Profile name
        name: String,
    },
}
