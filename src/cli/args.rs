//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::core::models::VehicleId;

/// Fleet telemetry poller - track vehicle locations into a local history.
#[derive(Parser, Debug)]
#[command(name = "fleetwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    // === Global flags ===
    /// Config file (default: <config dir>/fleetwatch/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// History database path
    #[arg(long, value_name = "PATH", global = true)]
    pub db: Option<PathBuf>,

    /// Saved token path
    #[arg(long, value_name = "PATH", global = true)]
    pub token_file: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit JSONL logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    /// Resolve the effective output format.
    #[must_use]
    pub fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll the configured vehicles until interrupted
    Run(PollArgs),

    /// Run a single polling cycle and print its report
    Once(PollArgs),

    /// Manage the saved access token
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Query the stored location history
    #[command(subcommand)]
    History(HistoryCommand),
}

/// Overrides for the polling commands.
#[derive(Args, Debug, Default, Clone)]
pub struct PollArgs {
    /// Vehicle to poll (repeatable; replaces the configured list)
    #[arg(long = "vehicle", value_name = "ID")]
    pub vehicles: Vec<VehicleId>,

    /// Seconds between cycles
    #[arg(long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// API base URL
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,
}

/// Token subcommands.
#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Acquire a fresh token and save it
    Login,
    /// Show whether the saved token is still valid
    Status,
    /// Delete the saved token
    Logout,
}

/// History subcommands.
#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// Show the newest records across all vehicles
    Latest {
        /// Number of records to show
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Per-vehicle record counts and time span
    Summary,

    /// Dump records to JSON or CSV
    Export(ExportArgs),
}

/// Arguments for `history export`.
#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Only this vehicle
    #[arg(long, value_name = "ID")]
    pub vehicle: Option<VehicleId>,

    /// At most this many records (newest first)
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Only records fetched within the last N hours
    #[arg(long, value_name = "HOURS")]
    pub since_hours: Option<u32>,

    /// Export format
    #[arg(long = "export-format", value_enum, default_value = "json")]
    pub export_format: ExportFormat,

    /// Write to this file instead of stdout
    #[arg(long, short, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Human,
    /// JSON output
    Json,
}

/// Export file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}
