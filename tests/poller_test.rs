//! End-to-end polling scenarios: real HTTP client against a mock API, real
//! SQLite history, fake credential acquirers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleetwatch::core::client::{LOCATION_PATH, TelemetryClient};
use fleetwatch::core::poller::{Poller, PollerSettings, VehicleOutcome};
use fleetwatch::core::session::AuthSession;
use fleetwatch::error::ErrorKind;
use fleetwatch::storage::credentials::CredentialStore;
use fleetwatch::storage::history::{HistoryStore, RecordFilter};
use fleetwatch::{FailingAcquirer, SequenceAcquirer};

use common::fixtures::{location_payload, mount_location};
use common::log_capture::TestLogCapture;
use common::logger::TestLogger;

struct Fixture {
    dir: TempDir,
    server: MockServer,
    acquirer: Arc<SequenceAcquirer>,
    store: Arc<HistoryStore>,
    session: Arc<AuthSession>,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let acquirer = Arc::new(SequenceAcquirer::new());
        let session = Arc::new(AuthSession::new(
            CredentialStore::new(dir.path().join("token.json")),
            acquirer.clone(),
        ));
        let store = Arc::new(HistoryStore::open(&dir.path().join("history.sqlite")).unwrap());
        Self {
            dir,
            server,
            acquirer,
            store,
            session,
        }
    }

    fn poller(&self, vehicles: Vec<i64>, max_concurrency: usize) -> Poller {
        let client = TelemetryClient::with_timeout(self.server.uri(), Duration::from_secs(5)).unwrap();
        Poller::new(
            Arc::new(client),
            self.session.clone(),
            self.store.clone(),
            PollerSettings {
                vehicles,
                interval: Duration::from_secs(60),
                vehicle_delay: Duration::ZERO,
                max_concurrency,
            },
        )
    }
}

// =============================================================================
// Change-driven storage
// =============================================================================

#[tokio::test]
async fn vehicle_history_only_grows_on_change() {
    let log = TestLogger::new("vehicle_history_only_grows_on_change");
    log.phase("setup");
    let fx = Fixture::new().await;
    mount_location(&fx.server, 42, location_payload(42, 28.4595, 77.0266, 40.0)).await;
    let poller = fx.poller(vec![42], 1);

    log.phase("cycle 1: first observation");
    let report = poller.run_cycle(1).await;
    assert_eq!(report.outcome_for(42), Some(&VehicleOutcome::Stored { record_id: 1 }));

    log.phase("cycle 2: identical observation");
    let report = poller.run_cycle(2).await;
    assert_eq!(report.outcome_for(42), Some(&VehicleOutcome::Unchanged));

    log.phase("cycle 3: jitter below tolerance");
    fx.server.reset().await;
    mount_location(&fx.server, 42, location_payload(42, 28.459_55, 77.0266, 40.0)).await;
    let report = poller.run_cycle(3).await;
    assert_eq!(report.outcome_for(42), Some(&VehicleOutcome::Unchanged));

    log.phase("cycle 4: vehicle moved");
    fx.server.reset().await;
    mount_location(&fx.server, 42, location_payload(42, 28.4700, 77.0300, 55.0)).await;
    let report = poller.run_cycle(4).await;
    assert_eq!(report.outcome_for(42), Some(&VehicleOutcome::Stored { record_id: 2 }));

    log.phase("verify");
    assert_eq!(fx.store.count_records(Some(42)).unwrap(), 2);
    let last = fx.store.last_record(42).unwrap().unwrap();
    assert_eq!(last.id, 2);
    assert_eq!(last.snapshot.speed, Some(55.0));
    assert_eq!(fx.acquirer.calls(), 1);
    log.finish_ok();
}

#[tokio::test]
async fn credential_is_reused_across_cycles_and_persisted() {
    let fx = Fixture::new().await;
    mount_location(&fx.server, 1, location_payload(1, 1.0, 2.0, 0.0)).await;
    let poller = fx.poller(vec![1], 1);

    poller.run_cycle(1).await;
    poller.run_cycle(2).await;

    assert_eq!(fx.acquirer.calls(), 1);
    let saved = fx.session.store().load().unwrap();
    assert_eq!(saved.access_token(), "token-1");
}

// =============================================================================
// Token rejection
// =============================================================================

#[tokio::test]
async fn rejected_token_is_renewed_and_request_retried() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path(LOCATION_PATH))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(1)
        .mount(&fx.server)
        .await;
    mount_location(&fx.server, 5, location_payload(5, 1.0, 2.0, 3.0)).await;

    let report = fx.poller(vec![5], 1).run_cycle(1).await;

    assert_eq!(report.outcome_for(5), Some(&VehicleOutcome::Stored { record_id: 1 }));
    assert_eq!(fx.acquirer.calls(), 2);
    assert_eq!(fx.session.store().load().unwrap().access_token(), "token-2");
}

#[tokio::test]
async fn persistent_rejection_gives_up_after_one_renewal() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path(LOCATION_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&fx.server)
        .await;

    let report = fx.poller(vec![5], 1).run_cycle(1).await;

    match report.outcome_for(5) {
        Some(VehicleOutcome::Failed { kind, .. }) => assert_eq!(*kind, ErrorKind::Auth),
        other => panic!("expected auth failure, got {other:?}"),
    }
    assert_eq!(fx.acquirer.calls(), 2);
    assert_eq!(fx.store.count_records(None).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rejections_share_one_renewal() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path(LOCATION_PATH))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(50)))
        .with_priority(1)
        .mount(&fx.server)
        .await;
    let vehicles: Vec<i64> = (1..=8).collect();
    for &v in &vehicles {
        mount_location(&fx.server, v, location_payload(v, 10.0, 20.0, 1.0)).await;
    }

    let report = fx.poller(vehicles.clone(), 8).run_cycle(1).await;

    assert_eq!(report.stored(), 8, "{report:?}");
    assert_eq!(fx.acquirer.calls(), 2, "one initial acquisition plus one renewal");
    let ids: Vec<i64> = report.vehicles.iter().map(|r| r.vehicle_id).collect();
    assert_eq!(ids, vehicles);
}

#[tokio::test]
async fn acquisition_failure_abandons_vehicles_without_requests() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LOCATION_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let acquirer = Arc::new(FailingAcquirer::new());
    let session = Arc::new(AuthSession::new(
        CredentialStore::new(dir.path().join("token.json")),
        acquirer.clone(),
    ));
    let store = Arc::new(HistoryStore::open_in_memory().unwrap());
    let poller = Poller::new(
        Arc::new(TelemetryClient::new(server.uri()).unwrap()),
        session,
        store,
        PollerSettings {
            vehicles: vec![1, 2],
            vehicle_delay: Duration::ZERO,
            ..PollerSettings::default()
        },
    );

    let report = poller.run_cycle(1).await;

    assert_eq!(report.failed(), 2);
    for vehicle in [1, 2] {
        match report.outcome_for(vehicle) {
            Some(VehicleOutcome::Failed { kind, .. }) => assert_eq!(*kind, ErrorKind::Acquisition),
            other => panic!("expected acquisition failure, got {other:?}"),
        }
    }
    assert!(acquirer.calls() >= 1);
}

// =============================================================================
// Failure isolation
// =============================================================================

#[tokio::test]
async fn one_bad_vehicle_does_not_affect_others() {
    let capture = TestLogCapture::start();
    let fx = Fixture::new().await;
    mount_location(&fx.server, 1, location_payload(1, 1.0, 1.0, 1.0)).await;
    Mock::given(method("GET"))
        .and(path(LOCATION_PATH))
        .and(wiremock::matchers::query_param("vehicleId", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&fx.server)
        .await;
    mount_location(&fx.server, 3, location_payload(3, 3.0, 3.0, 3.0)).await;

    let report = fx.poller(vec![1, 2, 3], 1).run_cycle(1).await;

    assert_eq!(report.outcome_for(1), Some(&VehicleOutcome::Stored { record_id: 1 }));
    assert!(matches!(
        report.outcome_for(2),
        Some(VehicleOutcome::Failed { kind: ErrorKind::Parse, .. })
    ));
    assert_eq!(report.outcome_for(3), Some(&VehicleOutcome::Stored { record_id: 2 }));
    assert_eq!(fx.store.vehicle_ids().unwrap(), vec![1, 3]);

    capture.assert_event_with_fields(
        "Vehicle abandoned",
        &[
            ("cycle", "1"),
            ("vehicle_id", "2"),
            ("error_kind", "parse"),
            ("error_code", "FW-P001"),
        ],
    );
    capture.assert_event_with_fields(
        "Cycle complete",
        &[("stored", "2"), ("skipped", "0"), ("failed", "1")],
    );
}

#[tokio::test]
async fn storage_failure_for_one_vehicle_does_not_affect_others() {
    let log = TestLogger::new("storage_failure_for_one_vehicle_does_not_affect_others");
    log.phase("setup");
    let fx = Fixture::new().await;
    for id in [1, 2, 3] {
        mount_location(&fx.server, id, location_payload(id, 1.0, 2.0, 3.0)).await;
    }
    // Inserts for vehicle 2 abort inside the database.
    let conn = rusqlite::Connection::open(fx.dir.path().join("history.sqlite")).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER reject_vehicle_2 BEFORE INSERT ON vehicle_location_history \
         WHEN NEW.vehicle_id = 2 BEGIN SELECT RAISE(ABORT, 'insert refused'); END;",
    )
    .unwrap();
    drop(conn);

    for max_concurrency in [1, 3] {
        log.phase(&format!("cycle with max_concurrency={max_concurrency}"));
        let report = fx.poller(vec![1, 2, 3], max_concurrency).run_cycle(1).await;

        match report.outcome_for(2) {
            Some(VehicleOutcome::Failed { kind, message }) => {
                assert_eq!(*kind, ErrorKind::Storage);
                assert!(message.contains("insert refused"), "{message}");
            }
            other => panic!("expected storage failure, got {other:?}"),
        }
        assert_eq!(report.failed(), 1);
    }

    log.phase("verify");
    assert_eq!(fx.store.count_records(Some(2)).unwrap(), 0);
    assert_eq!(fx.store.count_records(Some(1)).unwrap(), 1);
    assert_eq!(fx.store.count_records(Some(3)).unwrap(), 1);
    assert_eq!(fx.store.vehicle_ids().unwrap(), vec![1, 3]);
    log.finish_ok();
}

#[tokio::test]
async fn server_error_for_one_vehicle_is_retried_next_cycle() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path(LOCATION_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&fx.server)
        .await;
    mount_location(&fx.server, 8, location_payload(8, 5.0, 5.0, 0.0)).await;
    let poller = fx.poller(vec![8], 1);

    let first = poller.run_cycle(1).await;
    assert!(matches!(
        first.outcome_for(8),
        Some(VehicleOutcome::Failed { kind: ErrorKind::Network, .. })
    ));

    let second = poller.run_cycle(2).await;
    assert_eq!(second.outcome_for(8), Some(&VehicleOutcome::Stored { record_id: 1 }));
}

// =============================================================================
// Scheduling
// =============================================================================

#[tokio::test]
async fn cancellation_interrupts_inter_cycle_pause() {
    let fx = Fixture::new().await;
    mount_location(&fx.server, 1, location_payload(1, 1.0, 1.0, 1.0)).await;
    let poller = fx.poller(vec![1], 1);

    let cancel = CancellationToken::new();
    let in_callback = cancel.clone();
    let cycles = tokio::time::timeout(
        Duration::from_secs(5),
        poller.run_with(cancel, move |report| {
            assert_eq!(report.cycle, 1);
            in_callback.cancel();
        }),
    )
    .await
    .expect("poller stops well before the 60s interval elapses");

    assert_eq!(cycles, 1);
    assert_eq!(fx.store.count_records(None).unwrap(), 1);
}

#[tokio::test]
async fn run_keeps_cycling_until_cancelled() {
    let fx = Fixture::new().await;
    mount_location(&fx.server, 1, location_payload(1, 1.0, 1.0, 1.0)).await;
    let client = TelemetryClient::new(fx.server.uri()).unwrap();
    let poller = Poller::new(
        Arc::new(client),
        fx.session.clone(),
        fx.store.clone(),
        PollerSettings {
            vehicles: vec![1],
            interval: Duration::from_millis(20),
            vehicle_delay: Duration::ZERO,
            max_concurrency: 1,
        },
    );

    let cancel = CancellationToken::new();
    let in_callback = cancel.clone();
    let cycles = poller
        .run_with(cancel, move |report| {
            if report.cycle == 3 {
                in_callback.cancel();
            }
        })
        .await;

    assert_eq!(cycles, 3);
    assert_eq!(fx.store.count_records(None).unwrap(), 1);
    let all = fx.store.records(&RecordFilter::default()).unwrap();
    assert_eq!(all.len(), 1);
}
