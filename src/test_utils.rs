//! Test utilities for fleetwatch.
//!
//! Provides snapshot factories, scripted fakes for the remote API and the
//! login helper, temp directories, and assertion macros shared by unit and
//! integration tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use fleetwatch::test_utils::*;
//!
//! let source = ScriptedSource::new();
//! source.always(42, moving_snapshot(42, 10.0));
//! let acquirer = SequenceAcquirer::new();
//! let dir = TestDir::new();
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::acquire::CredentialAcquirer;
use crate::core::client::SnapshotSource;
use crate::core::models::{Credential, Snapshot, VehicleId, VehicleStatus};
use crate::error::{FleetError, Result};

// =============================================================================
// Test Data Factories
// =============================================================================

/// A running vehicle at (1.0, 2.0) with the given speed.
///
/// # Examples
///
/// ```rust,ignore
/// use fleetwatch::test_utils::moving_snapshot;
///
/// let snapshot = moving_snapshot(42, 10.0);
/// assert_eq!(snapshot.vehicle_id, Some(42));
/// ```
#[must_use]
pub fn moving_snapshot(vehicle: VehicleId, speed: f64) -> Snapshot {
    Snapshot {
        latitude: Some(1.0),
        longitude: Some(2.0),
        speed: Some(speed),
        status: Some(VehicleStatus::Running),
        ..Snapshot::for_vehicle(vehicle)
    }
}

/// A snapshot with every descriptive and counter field populated.
#[must_use]
pub fn make_test_snapshot(vehicle: VehicleId) -> Snapshot {
    Snapshot {
        device_id: Some("865006043000111".to_string()),
        account_id: Some(1001),
        vehicle_number: Some("KA01AB1234".to_string()),
        group_id: Some(7),
        vehicle_name: Some(format!("Truck {vehicle}")),
        vehicle_make: Some("Tata".to_string()),
        vehicle_model: Some("Prima".to_string()),
        vehicle_year: Some(2021),
        driver_name: Some("Asha".to_string()),
        driver_id: Some(501),
        fuel_type: Some("DIESEL".to_string()),
        vehicle_type: Some("TRUCK".to_string()),
        course: Some(180.0),
        address: Some("MG Road, Bengaluru".to_string()),
        gear: Some(4),
        rpm: Some("1450".to_string()),
        rpm_slot: Some(3),
        current_fuel_consumption: Some(1.2),
        total_fuel_consumption: Some(3450.5),
        current_odometer: Some(12.4),
        total_odometer: Some(85_210.7),
        mileage: Some(4.1),
        duration_engine_on: Some(3600),
        last_acc_on: Some("1760000000000".to_string()),
        time_stamp: Some("1760000000000".to_string()),
        create_date: Some("1759990000000".to_string()),
        server_time: Some(1_760_000_000_123),
        other_attributes: Some(serde_json::json!({"ignition": true, "door": "closed"})),
        ..moving_snapshot(vehicle, 10.0)
    }
}

/// JSON body of the remote location endpoint for a snapshot.
#[must_use]
pub fn snapshot_body(snapshot: &Snapshot) -> serde_json::Value {
    serde_json::to_value(snapshot).expect("snapshot serializes")
}

/// A minimal config file pointing at `base_url` and tracking `vehicles`.
#[must_use]
pub fn make_test_config_toml(base_url: &str, vehicles: &[VehicleId]) -> String {
    let ids = vehicles
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"[api]
base_url = "{base_url}"
request_timeout_seconds = 5

[polling]
interval_seconds = 1
vehicle_delay_ms = 0

[vehicles]
ids = [{ids}]
"#
    )
}

// =============================================================================
// Fake Credential Acquirers
// =============================================================================

/// Hands out `token-1`, `token-2`, ... and counts calls.
#[derive(Debug, Default)]
pub struct SequenceAcquirer {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl SequenceAcquirer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering, to widen race windows.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialAcquirer for SequenceAcquirer {
    async fn acquire(&self) -> Result<Credential> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Credential::fresh(format!("token-{n}")))
    }

    fn name(&self) -> &str {
        "sequence"
    }
}

/// Always fails, counting calls.
#[derive(Debug, Default)]
pub struct FailingAcquirer {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FailingAcquirer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialAcquirer for FailingAcquirer {
    async fn acquire(&self) -> Result<Credential> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Err(FleetError::Acquisition("login page did not yield a token".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

// =============================================================================
// Scripted Snapshot Source
// =============================================================================

/// Failure a [`ScriptedSource`] can be told to return.
#[derive(Debug, Clone)]
pub enum ScriptedFailure {
    Auth,
    Network(String),
    Parse(String),
}

impl ScriptedFailure {
    fn to_error(&self) -> FleetError {
        match self {
            Self::Auth => FleetError::AuthRejected { status: 401 },
            Self::Network(msg) => FleetError::Network(msg.clone()),
            Self::Parse(msg) => FleetError::ParseResponse(msg.clone()),
        }
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Snapshot(Snapshot),
    Failure(ScriptedFailure),
}

/// In-memory [`SnapshotSource`] with per-vehicle scripts.
///
/// Queued responses are served first, then the vehicle's standing response.
/// Token rejection is checked before either.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    queued: Mutex<HashMap<VehicleId, VecDeque<Scripted>>>,
    standing: Mutex<HashMap<VehicleId, Scripted>>,
    rejected_tokens: Mutex<HashSet<String>>,
    reject_all: AtomicBool,
    calls: Mutex<HashMap<VehicleId, usize>>,
    tokens_seen: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside every fetch.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Serve `snapshot` once, ahead of the standing response.
    pub fn push(&self, vehicle: VehicleId, snapshot: Snapshot) {
        self.queue(vehicle, Scripted::Snapshot(snapshot));
    }

    /// Fail once, ahead of the standing response.
    pub fn push_failure(&self, vehicle: VehicleId, failure: ScriptedFailure) {
        self.queue(vehicle, Scripted::Failure(failure));
    }

    /// Serve `snapshot` whenever nothing is queued.
    pub fn always(&self, vehicle: VehicleId, snapshot: Snapshot) {
        self.standing
            .lock()
            .unwrap()
            .insert(vehicle, Scripted::Snapshot(snapshot));
    }

    /// Fail whenever nothing is queued.
    pub fn always_fail(&self, vehicle: VehicleId, failure: ScriptedFailure) {
        self.standing
            .lock()
            .unwrap()
            .insert(vehicle, Scripted::Failure(failure));
    }

    /// Answer 401 to requests carrying `token`.
    pub fn reject_token(&self, token: &str) {
        self.rejected_tokens.lock().unwrap().insert(token.to_string());
    }

    /// Answer 401 to every request.
    pub fn reject_all(&self) {
        self.reject_all.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn calls_for(&self, vehicle: VehicleId) -> usize {
        self.calls.lock().unwrap().get(&vehicle).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Tokens presented so far, in call order.
    #[must_use]
    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().unwrap().clone()
    }

    fn queue(&self, vehicle: VehicleId, scripted: Scripted) {
        self.queued
            .lock()
            .unwrap()
            .entry(vehicle)
            .or_default()
            .push_back(scripted);
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch(
        &self,
        vehicle: VehicleId,
        _as_of: Option<DateTime<Utc>>,
        credential: &Credential,
    ) -> Result<Snapshot> {
        *self.calls.lock().unwrap().entry(vehicle).or_insert(0) += 1;
        self.tokens_seen
            .lock()
            .unwrap()
            .push(credential.access_token().to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.reject_all.load(Ordering::SeqCst)
            || self
                .rejected_tokens
                .lock()
                .unwrap()
                .contains(credential.access_token())
        {
            return Err(FleetError::AuthRejected { status: 401 });
        }

        let next = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&vehicle)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.standing.lock().unwrap().get(&vehicle).cloned());

        match next {
            Some(Scripted::Snapshot(snapshot)) => Ok(snapshot),
            Some(Scripted::Failure(failure)) => Err(failure.to_error()),
            None => Err(FleetError::Network(format!(
                "no scripted response for vehicle {vehicle}"
            ))),
        }
    }
}

// =============================================================================
// Temp Directory Utilities
// =============================================================================

/// A temporary directory for tests with automatic cleanup.
///
/// Creates an isolated directory that is automatically deleted when
/// the `TestDir` is dropped. Uses the `tempfile` crate internally.
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// Create a new isolated temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Create a file in the temporary directory with the given content.
    ///
    /// Creates parent directories as needed.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or written.
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.inner.path().join(name);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }

        let mut file = fs::File::create(&path).expect("Failed to create test file");
        file.write_all(content.as_bytes())
            .expect("Failed to write test file");
    }

    /// Read a file from the temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_file(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.inner.path().join(name))
    }

    /// Check if a file exists in the temporary directory.
    #[must_use]
    pub fn file_exists(&self, name: &str) -> bool {
        self.inner.path().join(name).exists()
    }

    /// Get the full path to a file in the temporary directory.
    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Assertion Macros
// =============================================================================

/// Assert that a string contains a substring.
///
/// # Examples
///
/// ```rust,ignore
/// use fleetwatch::assert_contains;
///
/// assert_contains!("error[FW-C001]: no vehicles", "FW-C001");
/// ```
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack = $haystack;
        let needle = $needle;
        assert!(
            haystack.contains(needle),
            "Expected string to contain {:?}\n\nActual string:\n{:?}",
            needle,
            haystack
        );
    };
    ($haystack:expr, $needle:expr, $($arg:tt)*) => {
        let haystack = $haystack;
        let needle = $needle;
        assert!(
            haystack.contains(needle),
            $($arg)*
        );
    };
}

/// Assert that a string does NOT contain a substring.
#[macro_export]
macro_rules! assert_not_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack = $haystack;
        let needle = $needle;
        assert!(
            !haystack.contains(needle),
            "Expected string NOT to contain {:?}\n\nActual string:\n{:?}",
            needle,
            haystack
        );
    };
}

/// Assert that a string is valid JSON.
#[macro_export]
macro_rules! assert_json_valid {
    ($json:expr) => {
        let json = $json;
        if let Err(e) = serde_json::from_str::<serde_json::Value>(json) {
            panic!(
                "Expected valid JSON, but parsing failed: {}\n\nJSON string:\n{}",
                e, json
            );
        }
    };
}

// =============================================================================
// Tests for Test Utilities
// =============================================================================
