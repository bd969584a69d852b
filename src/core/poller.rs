//! Polling scheduler.
//!
//! One cycle visits every configured vehicle:
//!
//! ```text
//! Idle -> Fetching -> Comparing -> Stored | Unchanged
//!                  \-> Failed(auth | network | parse | acquisition | storage)
//! ```
//!
//! A failure only abandons that vehicle for the current cycle. An auth
//! rejection gets exactly one renew-and-retry; a second rejection is final.
//! Cancellation is honored at pauses, never in the middle of a fetch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::client::SnapshotSource;
use crate::core::models::{Snapshot, VehicleId};
use crate::core::session::AuthSession;
use crate::error::{ErrorKind, FleetError, Result};
use crate::storage::history::{AppendOutcome, HistoryStore};

/// Default pause between cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

/// Default pause between vehicles within a cycle.
pub const DEFAULT_VEHICLE_DELAY: Duration = Duration::from_secs(2);

/// Scheduling parameters.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub vehicles: Vec<VehicleId>,
    pub interval: Duration,
    pub vehicle_delay: Duration,
    /// 1 = strictly sequential.
    pub max_concurrency: usize,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            vehicles: Vec::new(),
            interval: DEFAULT_INTERVAL,
            vehicle_delay: DEFAULT_VEHICLE_DELAY,
            max_concurrency: 1,
        }
    }
}

/// What happened to one vehicle in one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VehicleOutcome {
    Stored { record_id: i64 },
    Unchanged,
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleReport {
    pub vehicle_id: VehicleId,
    #[serde(flatten)]
    pub outcome: VehicleOutcome,
}

/// Summary of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// In configured vehicle order. Vehicles skipped by cancellation are absent.
    pub vehicles: Vec<VehicleReport>,
    pub cancelled: bool,
}

impl CycleReport {
    #[must_use]
    pub fn stored(&self) -> usize {
        self.count(|o| matches!(o, VehicleOutcome::Stored { .. }))
    }

    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, VehicleOutcome::Unchanged))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, VehicleOutcome::Failed { .. }))
    }

    #[must_use]
    pub fn outcome_for(&self, vehicle: VehicleId) -> Option<&VehicleOutcome> {
        self.vehicles
            .iter()
            .find(|r| r.vehicle_id == vehicle)
            .map(|r| &r.outcome)
    }

    fn count(&self, pred: impl Fn(&VehicleOutcome) -> bool) -> usize {
        self.vehicles.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Drives fetch, compare, and store for the configured vehicles.
pub struct Poller {
    source: Arc<dyn SnapshotSource>,
    session: Arc<AuthSession>,
    store: Arc<HistoryStore>,
    settings: PollerSettings,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Poller {
    #[must_use]
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        session: Arc<AuthSession>,
        store: Arc<HistoryStore>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            source,
            session,
            store,
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    /// Run one full cycle over every vehicle.
    pub async fn run_cycle(&self, cycle: u64) -> CycleReport {
        self.run_cycle_until(cycle, &CancellationToken::new()).await
    }

    /// Poll until `cancel` fires. Returns the number of cycles started.
    pub async fn run(&self, cancel: CancellationToken) -> u64 {
        self.run_with(cancel, |_| {}).await
    }

    /// Like [`Self::run`], handing every finished cycle to `on_cycle`.
    pub async fn run_with(
        &self,
        cancel: CancellationToken,
        mut on_cycle: impl FnMut(&CycleReport) + Send,
    ) -> u64 {
        tracing::info!(
            vehicles = ?self.settings.vehicles,
            interval_secs = self.settings.interval.as_secs(),
            max_concurrency = self.settings.max_concurrency,
            "Poller started"
        );

        let mut cycle = 0;
        while !cancel.is_cancelled() {
            cycle += 1;
            let report = self.run_cycle_until(cycle, &cancel).await;
            on_cycle(&report);
            if report.cancelled || pause(self.settings.interval, &cancel).await {
                break;
            }
        }

        tracing::info!(cycles = cycle, "Poller stopped");
        cycle
    }

    async fn run_cycle_until(&self, cycle: u64, cancel: &CancellationToken) -> CycleReport {
        let started_at = Utc::now();
        let start = Instant::now();
        tracing::debug!(cycle, vehicles = self.settings.vehicles.len(), "Cycle started");

        let (vehicles, cancelled) = if self.settings.max_concurrency > 1 {
            self.poll_concurrently(cycle, cancel).await
        } else {
            self.poll_sequentially(cycle, cancel).await
        };

        let report = CycleReport {
            cycle,
            started_at,
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            vehicles,
            cancelled,
        };

        tracing::info!(
            cycle,
            stored = report.stored(),
            skipped = report.unchanged(),
            failed = report.failed(),
            elapsed_ms = report.elapsed_ms,
            cancelled = report.cancelled,
            "Cycle complete"
        );
        report
    }

    async fn poll_sequentially(
        &self,
        cycle: u64,
        cancel: &CancellationToken,
    ) -> (Vec<VehicleReport>, bool) {
        let mut reports = Vec::with_capacity(self.settings.vehicles.len());

        for (index, &vehicle) in self.settings.vehicles.iter().enumerate() {
            if cancel.is_cancelled()
                || (index > 0 && pause(self.settings.vehicle_delay, cancel).await)
            {
                return (reports, true);
            }
            let outcome = self.poll_vehicle(cycle, vehicle).await;
            reports.push(VehicleReport {
                vehicle_id: vehicle,
                outcome,
            });
        }

        (reports, false)
    }

    async fn poll_concurrently(
        &self,
        cycle: u64,
        cancel: &CancellationToken,
    ) -> (Vec<VehicleReport>, bool) {
        // New fetches stop starting once cancelled; in-flight ones finish.
        let mut results: Vec<(usize, VehicleReport)> = stream::iter(
            self.settings.vehicles.iter().copied().enumerate(),
        )
        .take_while(|_| std::future::ready(!cancel.is_cancelled()))
        .map(|(index, vehicle)| async move {
            let outcome = self.poll_vehicle(cycle, vehicle).await;
            (
                index,
                VehicleReport {
                    vehicle_id: vehicle,
                    outcome,
                },
            )
        })
        .buffer_unordered(self.settings.max_concurrency)
        .collect()
        .await;

        results.sort_by_key(|(index, _)| *index);
        let cancelled = results.len() < self.settings.vehicles.len();
        (results.into_iter().map(|(_, r)| r).collect(), cancelled)
    }

    async fn poll_vehicle(&self, cycle: u64, vehicle: VehicleId) -> VehicleOutcome {
        let result = match self.fetch_with_reauth(vehicle).await {
            Ok(snapshot) => self.store_if_changed(snapshot).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(AppendOutcome::Stored(record)) => {
                tracing::info!(cycle, vehicle_id = vehicle, record_id = record.id, "Stored changed snapshot");
                VehicleOutcome::Stored {
                    record_id: record.id,
                }
            }
            Ok(AppendOutcome::Unchanged) => {
                tracing::debug!(cycle, vehicle_id = vehicle, "No change, skipped");
                VehicleOutcome::Unchanged
            }
            Err(e) => {
                let kind = e.kind();
                tracing::warn!(
                    cycle,
                    vehicle_id = vehicle,
                    error_kind = kind.as_str(),
                    error_code = e.error_code(),
                    error = %e,
                    "Vehicle abandoned for this cycle"
                );
                VehicleOutcome::Failed {
                    kind,
                    message: e.to_string(),
                }
            }
        }
    }

    /// Fetch with at most one renew-and-retry on auth rejection.
    async fn fetch_with_reauth(&self, vehicle: VehicleId) -> Result<Snapshot> {
        let credential = self.session.current().await?;

        match self.source.fetch(vehicle, None, &credential).await {
            Err(e) if e.is_auth_rejection() => {
                tracing::warn!(vehicle_id = vehicle, error = %e, "Token rejected, re-authenticating once");
                let renewed = self.session.renew(&credential).await?;
                self.source.fetch(vehicle, None, &renewed).await
            }
            other => other,
        }
    }

    async fn store_if_changed(&self, snapshot: Snapshot) -> Result<AppendOutcome> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.append_if_changed(&snapshot))
            .await
            .map_err(|e| FleetError::Other(anyhow::anyhow!("history task failed: {e}")))?
    }
}

/// Sleep for `duration` unless cancelled first. Returns true if cancelled.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return cancel.is_cancelled();
    }
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(duration) => false,
    }
}
