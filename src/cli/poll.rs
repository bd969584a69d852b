//! `run` and `once` commands.

use std::fmt::Write as _;

use tokio_util::sync::CancellationToken;

use crate::cli::args::OutputFormat;
use crate::cli::context::build_poller;
use crate::core::poller::{CycleReport, VehicleOutcome};
use crate::error::Result;
use crate::storage::config::ResolvedConfig;

/// Poll until Ctrl+C.
///
/// # Errors
/// Returns an error only if the poller cannot be assembled; per-vehicle
/// failures are reported in each cycle and never stop the loop.
pub async fn execute_run(config: &ResolvedConfig, format: OutputFormat) -> Result<()> {
    let poller = build_poller(config)?;

    // Ctrl+C handler for clean shutdown.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing current fetch");
        }
        signal_cancel.cancel();
    });

    let cycles = poller
        .run_with(cancel, |report| {
            if let Err(e) = print_report(report, format) {
                tracing::warn!(error = %e, "Failed to print cycle report");
            }
        })
        .await;

    if format == OutputFormat::Human {
        println!("Stopped after {cycles} cycle(s).");
    }
    Ok(())
}

/// Run one cycle and print its report.
///
/// # Errors
/// Returns an error if the poller cannot be assembled or the report
/// cannot be written.
pub async fn execute_once(config: &ResolvedConfig, format: OutputFormat) -> Result<()> {
    let poller = build_poller(config)?;
    let report = poller.run_cycle(1).await;
    print_report(&report, format)
}

fn print_report(report: &CycleReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(report)?),
        OutputFormat::Human => print!("{}", render_report(report)),
    }
    Ok(())
}

/// Human-readable cycle report.
#[must_use]
pub fn render_report(report: &CycleReport) -> String {
    let mut out = format!(
        "Cycle {} at {} ({} ms): {} stored, {} unchanged, {} failed{}\n",
        report.cycle,
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.elapsed_ms,
        report.stored(),
        report.unchanged(),
        report.failed(),
        if report.cancelled { " (cancelled)" } else { "" },
    );

    for vehicle in &report.vehicles {
        let line = match &vehicle.outcome {
            VehicleOutcome::Stored { record_id } => format!("stored as record {record_id}"),
            VehicleOutcome::Unchanged => "unchanged".to_string(),
            VehicleOutcome::Failed { kind, message } => {
                format!("failed ({}): {message}", kind.as_str())
            }
        };
        let _ = writeln!(out, "  vehicle {:>8}  {line}", vehicle.vehicle_id);
    }
    out
}
