//! Vehicle location history storage layer.
//!
//! Append-only log of [`HistoryRecord`]s in `SQLite`. Writers go through
//! [`HistoryStore::append_if_changed`], which reads the last record and
//! inserts inside one `IMMEDIATE` transaction, so two writers for the same
//! vehicle can never both decide against the same "last" record.
//!
//! The connection sits behind a mutex. Methods are synchronous; async callers
//! run them on the blocking pool.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;

use crate::core::change::{changed_fields, has_changed};
use crate::core::models::{HistoryRecord, Snapshot, VehicleId, VehicleStatus};
use crate::error::{FleetError, Result};
use crate::storage::history_schema::run_migrations;

const SELECT_COLUMNS: &str = "\
    id, fetch_timestamp, \
    vehicle_id, device_id, account_id, vehicle_number, group_id, \
    vehicle_name, vehicle_make, vehicle_model, vehicle_year, driver_name, driver_id, fuel_type, type, \
    latitude, longitude, speed, course, address, gear, rpm, rpm_slot, \
    current_fuel_consumption, total_fuel_consumption, current_def_consumption, total_def_consumption, \
    trip_ev_battery_consumed, trip_ev_battery_voltage_consumed, current_odometer, total_odometer, \
    mileage, mileage_def, mileage_ev, mileage_ev_voltage, duration_engine_on, \
    status, last_acc_on, timestamp, create_date, server_time, other_attributes";

/// Result of [`HistoryStore::append_if_changed`].
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// The snapshot differed from the last record and was stored.
    Stored(HistoryRecord),
    /// The snapshot matched the last record; nothing was written.
    Unchanged,
}

/// Filter for [`HistoryStore::records`]. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub vehicle: Option<VehicleId>,
    /// Only records fetched at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Per-vehicle aggregate for the read side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleSummary {
    pub vehicle_id: VehicleId,
    pub record_count: i64,
    pub first_fetch: DateTime<Utc>,
    pub last_fetch: DateTime<Utc>,
    pub vehicle_number: Option<String>,
    pub vehicle_name: Option<String>,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub last_status: Option<VehicleStatus>,
}

/// History database access layer.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore").finish_non_exhaustive()
    }
}

impl HistoryStore {
    /// Create or open a history database at the given path.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created, the database
    /// cannot be opened, or schema migrations fail.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(path).map_err(|e| FleetError::storage("open history db", e))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| FleetError::storage("set busy timeout", e))?;

        run_migrations(&mut conn)?;
        tracing::debug!(path = %path.display(), "History database ready");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory history database (for testing).
    ///
    /// # Errors
    /// Returns an error if the in-memory database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()
            .map_err(|e| FleetError::storage("open in-memory db", e))?;

        run_migrations(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Most recent record for a vehicle by fetch timestamp (ties by id).
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn last_record(&self, vehicle: VehicleId) -> Result<Option<HistoryRecord>> {
        query_last(&self.lock(), vehicle)
    }

    /// Append a snapshot unconditionally.
    ///
    /// # Errors
    /// Returns [`FleetError::Storage`] if the snapshot has no vehicle id or the
    /// insert fails; nothing is written in that case.
    pub fn append(&self, snapshot: &Snapshot) -> Result<HistoryRecord> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| FleetError::storage("begin append", e))?;
        let record = insert_record(&tx, snapshot, Utc::now())?;
        tx.commit().map_err(|e| FleetError::storage("commit append", e))?;
        Ok(record)
    }

    /// Append a snapshot only if it differs from the vehicle's last record.
    ///
    /// # Errors
    /// Returns [`FleetError::Storage`] on any database failure; the
    /// transaction is rolled back and nothing is written.
    pub fn append_if_changed(&self, snapshot: &Snapshot) -> Result<AppendOutcome> {
        let vehicle = require_vehicle_id(snapshot)?;
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| FleetError::storage("begin append", e))?;

        let last = query_last(&tx, vehicle)?;
        let last_snapshot = last.as_ref().map(|r| &r.snapshot);

        if !has_changed(snapshot, last_snapshot) {
            // Dropping the transaction rolls back; nothing was written.
            return Ok(AppendOutcome::Unchanged);
        }
        if let Some(previous) = last_snapshot {
            tracing::debug!(
                vehicle_id = vehicle,
                fields = ?changed_fields(snapshot, previous),
                "Snapshot changed"
            );
        }

        let record = insert_record(&tx, snapshot, Utc::now())?;
        tx.commit().map_err(|e| FleetError::storage("commit append", e))?;
        Ok(AppendOutcome::Stored(record))
    }

    /// Records matching `filter`, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn records(&self, filter: &RecordFilter) -> Result<Vec<HistoryRecord>> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM vehicle_location_history WHERE 1 = 1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(vehicle) = filter.vehicle {
            args.push(Box::new(vehicle));
            sql.push_str(&format!(" AND vehicle_id = ?{}", args.len()));
        }
        if let Some(since) = filter.since {
            args.push(Box::new(format_timestamp(since)));
            sql.push_str(&format!(" AND fetch_timestamp >= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY fetch_timestamp DESC, id DESC");
        if let Some(limit) = filter.limit {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            args.push(Box::new(limit));
            sql.push_str(&format!(" LIMIT ?{}", args.len()));
        }

        let conn = self.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| FleetError::storage("prepare select", e))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), map_row)
            .map_err(|e| FleetError::storage("query records", e))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| FleetError::storage("map row", e))?);
        }
        Ok(records)
    }

    /// Distinct vehicle ids with at least one record, ascending.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn vehicle_ids(&self) -> Result<Vec<VehicleId>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT DISTINCT vehicle_id FROM vehicle_location_history ORDER BY vehicle_id",
            )
            .map_err(|e| FleetError::storage("prepare vehicle ids", e))?;
        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| FleetError::storage("query vehicle ids", e))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(|e| FleetError::storage("map row", e))?);
        }
        Ok(ids)
    }

    /// Record count and time span for one vehicle, `None` if it has no records.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn vehicle_summary(&self, vehicle: VehicleId) -> Result<Option<VehicleSummary>> {
        let conn = self.lock();
        let span: Option<(i64, String, String)> = conn
            .query_row(
                "SELECT COUNT(*), MIN(fetch_timestamp), MAX(fetch_timestamp) \
                 FROM vehicle_location_history WHERE vehicle_id = ?1 \
                 GROUP BY vehicle_id",
                [vehicle],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| FleetError::storage("query vehicle summary", e))?;

        let Some((record_count, first, last)) = span else {
            return Ok(None);
        };
        let latest = query_last(&conn, vehicle)?.map(|r| r.snapshot).unwrap_or_default();

        Ok(Some(VehicleSummary {
            vehicle_id: vehicle,
            record_count,
            first_fetch: parse_timestamp(&first)
                .map_err(|e| FleetError::storage("parse first fetch", e))?,
            last_fetch: parse_timestamp(&last)
                .map_err(|e| FleetError::storage("parse last fetch", e))?,
            vehicle_number: latest.vehicle_number,
            vehicle_name: latest.vehicle_name,
            vehicle_make: latest.vehicle_make,
            vehicle_model: latest.vehicle_model,
            last_status: latest.status,
        }))
    }

    /// Total records, optionally for one vehicle.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn count_records(&self, vehicle: Option<VehicleId>) -> Result<i64> {
        let conn = self.lock();
        let count = match vehicle {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM vehicle_location_history WHERE vehicle_id = ?1",
                [id],
                |row| row.get(0),
            ),
            None => conn.query_row("SELECT COUNT(*) FROM vehicle_location_history", [], |row| {
                row.get(0)
            }),
        }
        .map_err(|e| FleetError::storage("count records", e))?;
        Ok(count)
    }
}

fn require_vehicle_id(snapshot: &Snapshot) -> Result<VehicleId> {
    snapshot
        .vehicle_id
        .ok_or_else(|| FleetError::Storage("snapshot has no vehicle id".to_string()))
}

fn query_last(conn: &Connection, vehicle: VehicleId) -> Result<Option<HistoryRecord>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {SELECT_COLUMNS} FROM vehicle_location_history \
             WHERE vehicle_id = ?1 \
             ORDER BY fetch_timestamp DESC, id DESC LIMIT 1"
        ))
        .map_err(|e| FleetError::storage("prepare last record", e))?;

    stmt.query_row([vehicle], map_row)
        .optional()
        .map_err(|e| FleetError::storage("query last record", e))
}

fn insert_record(
    conn: &Connection,
    snapshot: &Snapshot,
    fetched_at: DateTime<Utc>,
) -> Result<HistoryRecord> {
    let vehicle = require_vehicle_id(snapshot)?;
    let other_attributes = snapshot
        .other_attributes
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let s = snapshot;

    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO vehicle_location_history ( \
                fetch_timestamp, \
                vehicle_id, device_id, account_id, vehicle_number, group_id, \
                vehicle_name, vehicle_make, vehicle_model, vehicle_year, driver_name, driver_id, fuel_type, type, \
                latitude, longitude, speed, course, address, gear, rpm, rpm_slot, \
                current_fuel_consumption, total_fuel_consumption, current_def_consumption, total_def_consumption, \
                trip_ev_battery_consumed, trip_ev_battery_voltage_consumed, current_odometer, total_odometer, \
                mileage, mileage_def, mileage_ev, mileage_ev_voltage, duration_engine_on, \
                status, last_acc_on, timestamp, create_date, server_time, other_attributes \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, \
                      ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34, \
                      ?35, ?36, ?37, ?38, ?39, ?40, ?41)",
        )
        .map_err(|e| FleetError::storage("prepare insert", e))?;

    stmt.execute(params![
        format_timestamp(fetched_at),
        vehicle,
        s.device_id,
        s.account_id,
        s.vehicle_number,
        s.group_id,
        s.vehicle_name,
        s.vehicle_make,
        s.vehicle_model,
        s.vehicle_year,
        s.driver_name,
        s.driver_id,
        s.fuel_type,
        s.vehicle_type,
        s.latitude,
        s.longitude,
        s.speed,
        s.course,
        s.address,
        s.gear,
        s.rpm,
        s.rpm_slot,
        s.current_fuel_consumption,
        s.total_fuel_consumption,
        s.current_def_consumption,
        s.total_def_consumption,
        s.trip_ev_battery_consumed,
        s.trip_ev_battery_voltage_consumed,
        s.current_odometer,
        s.total_odometer,
        s.mileage,
        s.mileage_def,
        s.mileage_ev,
        s.mileage_ev_voltage,
        s.duration_engine_on,
        s.status.as_ref().map(VehicleStatus::as_str),
        s.last_acc_on,
        s.time_stamp,
        s.create_date,
        s.server_time,
        other_attributes,
    ])
    .map_err(|e| FleetError::storage("insert record", e))?;

    let id = conn.last_insert_rowid();
    tracing::debug!(vehicle_id = vehicle, record_id = id, "Record appended");

    Ok(HistoryRecord {
        id,
        fetch_timestamp: fetched_at,
        snapshot: snapshot.clone(),
    })
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let fetched: String = row.get("fetch_timestamp")?;
    let fetch_timestamp = parse_timestamp(&fetched)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    let other_attributes: Option<String> = row.get("other_attributes")?;
    let other_attributes = other_attributes.map(|raw| {
        serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
    });
    let status: Option<String> = row.get("status")?;

    Ok(HistoryRecord {
        id: row.get("id")?,
        fetch_timestamp,
        snapshot: Snapshot {
            vehicle_id: row.get("vehicle_id")?,
            device_id: row.get("device_id")?,
            account_id: row.get("account_id")?,
            vehicle_number: row.get("vehicle_number")?,
            group_id: row.get("group_id")?,
            vehicle_name: row.get("vehicle_name")?,
            vehicle_make: row.get("vehicle_make")?,
            vehicle_model: row.get("vehicle_model")?,
            vehicle_year: row.get("vehicle_year")?,
            driver_name: row.get("driver_name")?,
            driver_id: row.get("driver_id")?,
            fuel_type: row.get("fuel_type")?,
            vehicle_type: row.get("type")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            speed: row.get("speed")?,
            course: row.get("course")?,
            address: row.get("address")?,
            gear: row.get("gear")?,
            rpm: row.get("rpm")?,
            rpm_slot: row.get("rpm_slot")?,
            current_fuel_consumption: row.get("current_fuel_consumption")?,
            total_fuel_consumption: row.get("total_fuel_consumption")?,
            current_def_consumption: row.get("current_def_consumption")?,
            total_def_consumption: row.get("total_def_consumption")?,
            trip_ev_battery_consumed: row.get("trip_ev_battery_consumed")?,
            trip_ev_battery_voltage_consumed: row.get("trip_ev_battery_voltage_consumed")?,
            current_odometer: row.get("current_odometer")?,
            total_odometer: row.get("total_odometer")?,
            mileage: row.get("mileage")?,
            mileage_def: row.get("mileage_def")?,
            mileage_ev: row.get("mileage_ev")?,
            mileage_ev_voltage: row.get("mileage_ev_voltage")?,
            duration_engine_on: row.get("duration_engine_on")?,
            status: status.map(VehicleStatus::from),
            last_acc_on: row.get("last_acc_on")?,
            time_stamp: row.get("timestamp")?,
            create_date: row.get("create_date")?,
            server_time: row.get("server_time")?,
            other_attributes,
        },
    })
}

/// Fixed-width UTC so lexical order matches chronological order.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        // SQLite CURRENT_TIMESTAMP format
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|naive| naive.and_utc())
        })
}
