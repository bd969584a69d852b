//! Polling pipeline: models, credentials, fetch, change detection, scheduling.

pub mod acquire;
pub mod change;
pub mod cli_runner;
pub mod client;
pub mod http;
pub mod logging;
pub mod models;
pub mod poller;
pub mod session;

pub use acquire::{CommandAcquirer, CredentialAcquirer, StaticTokenAcquirer};
pub use change::{COMPARED_FIELDS, FLOAT_TOLERANCE, changed_fields, has_changed};
pub use client::{SnapshotSource, TelemetryClient};
pub use models::{Credential, HistoryRecord, Snapshot, VehicleId, VehicleStatus};
pub use poller::{CycleReport, Poller, PollerSettings, VehicleOutcome, VehicleReport};
pub use session::AuthSession;
