//! History command implementation.
//!
//! Read-side views of the location history: newest records, per-vehicle
//! summaries, and bulk export to JSON or CSV.

use std::fs::File;
use std::io::{BufWriter, Write};

use chrono::{TimeDelta, Utc};
use serde_json::Value;

use crate::cli::args::{ExportArgs, ExportFormat, HistoryCommand, OutputFormat};
use crate::core::models::HistoryRecord;
use crate::error::{FleetError, Result};
use crate::storage::config::ResolvedConfig;
use crate::storage::history::{HistoryStore, RecordFilter, VehicleSummary};

/// CSV header names paired with the JSON key each value is read from.
const CSV_COLUMNS: &[(&str, &str)] = &[
    ("id", "id"),
    ("fetch_timestamp", "fetch_timestamp"),
    ("vehicle_id", "vehicleId"),
    ("device_id", "deviceId"),
    ("account_id", "accountId"),
    ("vehicle_number", "vehicleNumber"),
    ("group_id", "groupId"),
    ("vehicle_name", "vehicleName"),
    ("vehicle_make", "vehicleMake"),
    ("vehicle_model", "vehicleModel"),
    ("vehicle_year", "vehicleYear"),
    ("driver_name", "driverName"),
    ("driver_id", "driverId"),
    ("fuel_type", "fuelType"),
    ("type", "type"),
    ("latitude", "latitude"),
    ("longitude", "longitude"),
    ("speed", "speed"),
    ("course", "course"),
    ("address", "address"),
    ("gear", "gear"),
    ("rpm", "rpm"),
    ("rpm_slot", "rpmSlot"),
    ("current_fuel_consumption", "currentFuelConsumption"),
    ("total_fuel_consumption", "totalFuelConsumption"),
    ("current_def_consumption", "currentDEFConsumption"),
    ("total_def_consumption", "totalDEFConsumption"),
    ("trip_ev_battery_consumed", "tripEVBatteryConsumed"),
    ("trip_ev_battery_voltage_consumed", "tripEVBatteryVoltageConsumed"),
    ("current_odometer", "currentOdometer"),
    ("total_odometer", "totalOdometer"),
    ("mileage", "mileage"),
    ("mileage_def", "mileageDEF"),
    ("mileage_ev", "mileageEV"),
    ("mileage_ev_voltage", "mileageEVVoltage"),
    ("duration_engine_on", "durationEngineOn"),
    ("status", "status"),
    ("last_acc_on", "lastAccOn"),
    ("timestamp", "timeStamp"),
    ("create_date", "createDate"),
    ("server_time", "serverTime"),
    ("other_attributes", "otherAttributes"),
];

/// Execute history commands.
///
/// # Errors
/// Returns an error if the history database cannot be opened, or if the
/// requested subcommand fails.
pub fn execute(cmd: &HistoryCommand, config: &ResolvedConfig, format: OutputFormat) -> Result<()> {
    match cmd {
        HistoryCommand::Latest { limit } => execute_latest(config, *limit, format),
        HistoryCommand::Summary => execute_summary(config, format),
        HistoryCommand::Export(args) => execute_export(config, args),
    }
}

/// Open the database only if it exists; the read side never creates one.
fn open_existing(config: &ResolvedConfig) -> Result<Option<HistoryStore>> {
    if !config.database_path.exists() {
        return Ok(None);
    }
    HistoryStore::open(&config.database_path).map(Some)
}

fn print_no_data(command: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "command": command,
                "data": null,
                "message": "No history data available. Run `fleetwatch run` to start collecting data."
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Human => {
            println!("No history data available.");
            println!("Run `fleetwatch run` to start collecting location data.");
        }
    }
    Ok(())
}

fn execute_latest(config: &ResolvedConfig, limit: usize, format: OutputFormat) -> Result<()> {
    let Some(store) = open_existing(config)? else {
        return print_no_data("history latest", format);
    };

    let records = store.records(&RecordFilter {
        limit: Some(limit),
        ..RecordFilter::default()
    })?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "command": "history latest",
                "data": records,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Human => {
            if records.is_empty() {
                println!("No records stored yet.");
                return Ok(());
            }
            println!(
                "{:<6} {:<20} {:>9} {:>11} {:>11} {:>7} {:<12}",
                "ID", "Fetched (UTC)", "Vehicle", "Latitude", "Longitude", "Speed", "Status"
            );
            for record in &records {
                println!("{}", format_record_row(record));
            }
        }
    }
    Ok(())
}

fn format_record_row(record: &HistoryRecord) -> String {
    let s = &record.snapshot;
    format!(
        "{:<6} {:<20} {:>9} {:>11} {:>11} {:>7} {:<12}",
        record.id,
        record.fetch_timestamp.format("%Y-%m-%d %H:%M:%S"),
        s.vehicle_id.map_or_else(|| "-".to_string(), |v| v.to_string()),
        s.latitude.map_or_else(|| "-".to_string(), |v| format!("{v:.5}")),
        s.longitude.map_or_else(|| "-".to_string(), |v| format!("{v:.5}")),
        s.speed.map_or_else(|| "-".to_string(), |v| format!("{v:.1}")),
        s.status.as_ref().map_or("-", |st| st.as_str()),
    )
}

fn execute_summary(config: &ResolvedConfig, format: OutputFormat) -> Result<()> {
    let Some(store) = open_existing(config)? else {
        return print_no_data("history summary", format);
    };

    let mut summaries: Vec<VehicleSummary> = Vec::new();
    for vehicle in store.vehicle_ids()? {
        if let Some(summary) = store.vehicle_summary(vehicle)? {
            summaries.push(summary);
        }
    }
    let total = store.count_records(None)?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "command": "history summary",
                "data": {
                    "totalRecords": total,
                    "vehicles": summaries,
                },
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Human => {
            println!("History: {}", config.database_path.display());
            println!("Total records: {total}");
            if summaries.is_empty() {
                return Ok(());
            }
            println!();
            println!(
                "{:>9} {:<14} {:<20} {:>8} {:<20} {:<20} {:<10}",
                "Vehicle", "Number", "Name", "Records", "First (UTC)", "Last (UTC)", "Status"
            );
            for s in &summaries {
                println!(
                    "{:>9} {:<14} {:<20} {:>8} {:<20} {:<20} {:<10}",
                    s.vehicle_id,
                    s.vehicle_number.as_deref().unwrap_or("-"),
                    s.vehicle_name.as_deref().unwrap_or("-"),
                    s.record_count,
                    s.first_fetch.format("%Y-%m-%d %H:%M:%S"),
                    s.last_fetch.format("%Y-%m-%d %H:%M:%S"),
                    s.last_status.as_ref().map_or("-", |st| st.as_str()),
                );
            }
        }
    }
    Ok(())
}

fn execute_export(config: &ResolvedConfig, args: &ExportArgs) -> Result<()> {
    let Some(store) = open_existing(config)? else {
        return Err(FleetError::Config(format!(
            "No history database found at {}. Run `fleetwatch run` to start collecting data.",
            config.database_path.display()
        )));
    };

    let filter = RecordFilter {
        vehicle: args.vehicle,
        since: args
            .since_hours
            .map(|hours| Utc::now() - TimeDelta::hours(i64::from(hours))),
        limit: args.limit,
    };
    let records = store.records(&filter)?;

    // Create writer (file or stdout)
    let writer: Box<dyn Write> = if let Some(ref path) = args.output {
        let file = File::create(path).map_err(|e| {
            FleetError::Config(format!(
                "Failed to create output file '{}': {e}",
                path.display()
            ))
        })?;
        Box::new(BufWriter::new(file))
    } else {
        Box::new(std::io::stdout())
    };

    match args.export_format {
        ExportFormat::Json => export_json(writer, &records)?,
        ExportFormat::Csv => export_csv(writer, &records)?,
    }

    // Print summary to stderr if writing to file
    if let Some(ref output_path) = args.output {
        eprintln!(
            "Exported {} records to {}",
            records.len(),
            output_path.display()
        );
    }

    Ok(())
}

/// Write records as a pretty JSON array.
///
/// # Errors
/// Returns an error if serialization or the write fails.
pub fn export_json(mut writer: Box<dyn Write>, records: &[HistoryRecord]) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, records)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write records as CSV with one column per stored field.
///
/// # Errors
/// Returns an error if serialization or the write fails.
pub fn export_csv(mut writer: Box<dyn Write>, records: &[HistoryRecord]) -> Result<()> {
    let header: Vec<&str> = CSV_COLUMNS.iter().map(|(name, _)| *name).collect();
    writeln!(writer, "{}", header.join(","))
        .map_err(|e| FleetError::Other(anyhow::anyhow!("Failed to write CSV header: {e}")))?;

    for record in records {
        let value = serde_json::to_value(record)?;
        let row: Vec<String> = CSV_COLUMNS
            .iter()
            .map(|(_, key)| csv_value(value.get(*key)))
            .collect();
        writeln!(writer, "{}", row.join(","))
            .map_err(|e| FleetError::Other(anyhow::anyhow!("Failed to write CSV row: {e}")))?;
    }

    writer.flush()?;
    Ok(())
}

fn csv_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => csv_escape(s),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => csv_escape(&other.to_string()),
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
