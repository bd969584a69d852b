//! Core data models.
//!
//! `Snapshot` mirrors the remote vehicle-location payload field for field
//! (camelCase on the wire). Every field is optional because the remote omits
//! values freely. Snapshots are never mutated once decoded.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Stable identifier of a tracked vehicle.
pub type VehicleId = i64;

// =============================================================================
// Vehicle status
// =============================================================================

/// Reported vehicle status. Unknown values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VehicleStatus {
    Running,
    Idle,
    Stopped,
    Parked,
    Unreachable,
    Other(String),
}

impl VehicleStatus {
    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "RUNNING",
            Self::Idle => "IDLE",
            Self::Stopped => "STOPPED",
            Self::Parked => "PARKED",
            Self::Unreachable => "UNREACHABLE",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for VehicleStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "RUNNING" => Self::Running,
            "IDLE" => Self::Idle,
            "STOPPED" => Self::Stopped,
            "PARKED" => Self::Parked,
            "UNREACHABLE" => Self::Unreachable,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for VehicleStatus {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<VehicleStatus> for String {
    fn from(status: VehicleStatus) -> Self {
        match status {
            VehicleStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// One point-in-time observed state of a vehicle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    // Identity
    pub vehicle_id: Option<VehicleId>,
    #[serde(default, deserialize_with = "flex_string")]
    pub device_id: Option<String>,
    pub account_id: Option<i64>,
    #[serde(default, deserialize_with = "flex_string")]
    pub vehicle_number: Option<String>,
    pub group_id: Option<i64>,

    // Descriptive
    pub vehicle_name: Option<String>,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_year: Option<i32>,
    pub driver_name: Option<String>,
    pub driver_id: Option<i64>,
    pub fuel_type: Option<String>,
    #[serde(rename = "type")]
    pub vehicle_type: Option<String>,

    // Kinematic
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub address: Option<String>,
    pub gear: Option<i64>,
    #[serde(default, deserialize_with = "flex_string")]
    pub rpm: Option<String>,
    pub rpm_slot: Option<i64>,

    // Counters
    pub current_fuel_consumption: Option<f64>,
    pub total_fuel_consumption: Option<f64>,
    #[serde(rename = "currentDEFConsumption")]
    pub current_def_consumption: Option<f64>,
    #[serde(rename = "totalDEFConsumption")]
    pub total_def_consumption: Option<f64>,
    #[serde(rename = "tripEVBatteryConsumed")]
    pub trip_ev_battery_consumed: Option<f64>,
    #[serde(rename = "tripEVBatteryVoltageConsumed")]
    pub trip_ev_battery_voltage_consumed: Option<f64>,
    pub current_odometer: Option<f64>,
    pub total_odometer: Option<f64>,
    pub mileage: Option<f64>,
    #[serde(rename = "mileageDEF")]
    pub mileage_def: Option<f64>,
    #[serde(rename = "mileageEV")]
    pub mileage_ev: Option<f64>,
    #[serde(rename = "mileageEVVoltage")]
    pub mileage_ev_voltage: Option<f64>,
    pub duration_engine_on: Option<i64>,

    // Status
    pub status: Option<VehicleStatus>,
    #[serde(default, deserialize_with = "flex_string")]
    pub last_acc_on: Option<String>,

    // Timestamps as reported by the remote
    #[serde(rename = "timeStamp", default, deserialize_with = "flex_string")]
    pub time_stamp: Option<String>,
    #[serde(default, deserialize_with = "flex_string")]
    pub create_date: Option<String>,
    pub server_time: Option<i64>,

    /// Opaque attribute bag, stored serialized and never inspected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_attributes: Option<serde_json::Value>,
}

/// Accept a string, number, or bool and keep its textual form.
fn flex_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

impl Snapshot {
    /// Snapshot for a vehicle with every other field empty.
    #[must_use]
    pub fn for_vehicle(vehicle_id: VehicleId) -> Self {
        Self {
            vehicle_id: Some(vehicle_id),
            ..Self::default()
        }
    }
}

// =============================================================================
// History record
// =============================================================================

/// A persisted snapshot plus its row id and ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    /// Auto-incrementing row id.
    pub id: i64,
    /// Wall-clock time the snapshot was ingested.
    pub fetch_timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

// =============================================================================
// Credential
// =============================================================================

/// Default credential lifetime.
pub const DEFAULT_CREDENTIAL_VALIDITY: TimeDelta = TimeDelta::hours(12);

/// A bearer token and the moment it was acquired.
///
/// Renewal produces a new value; a credential is never patched in place.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    acquired_at: DateTime<Utc>,
}

impl Credential {
    #[must_use]
    pub fn new(access_token: impl Into<String>, acquired_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            acquired_at,
        }
    }

    /// Credential acquired right now.
    #[must_use]
    pub fn fresh(access_token: impl Into<String>) -> Self {
        Self::new(access_token, Utc::now())
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub const fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// `now - acquired_at < window`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        now.signed_duration_since(self.acquired_at) < window
    }

    #[must_use]
    pub fn expires_at(&self, window: TimeDelta) -> DateTime<Utc> {
        self.acquired_at + window
    }

    /// Token prefix safe for logs.
    #[must_use]
    pub fn redacted(&self) -> String {
        let prefix: String = self.access_token.chars().take(6).collect();
        format!("{prefix}...")
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &self.redacted())
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}
