//! fleetwatch - Fleet telemetry poller
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use clap::Parser;
use std::process::ExitCode;

use fleetwatch::cli::{self, Cli, OutputFormat};
use fleetwatch::core::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = cli
        .log_level
        .as_deref()
        .and_then(logging::LogLevel::from_arg)
        .or_else(logging::parse_log_level_from_env)
        .unwrap_or_default();
    let log_format = if cli.json_output {
        logging::LogFormat::Json
    } else {
        logging::parse_log_format_from_env().unwrap_or_default()
    };
    let log_file = logging::parse_log_file_from_env();
    logging::init(log_level, log_format, log_file, cli.verbose);

    match cli::dispatch(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "Command failed");
            if cli.effective_format() == OutputFormat::Json {
                let output = serde_json::json!({
                    "error": {
                        "code": e.error_code(),
                        "kind": e.kind(),
                        "message": e.to_string(),
                    }
                });
                eprintln!("{output}");
            } else {
                eprintln!("error[{}]: {e}", e.error_code());
            }
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
