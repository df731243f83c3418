//! End-to-end dispatch scenarios against a real SQLite store: both dispatch
//! paths running, real timers (shortened via config), mock collaborators.

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use backend::batch::BatchCollector;
use backend::config::DispatchConfig;
use backend::contracts::drivers::DriverStatus;
use backend::contracts::ratings::DriverRatingStats;
use backend::db::schema;
use backend::error::DispatchError;
use backend::metrics::Counters;
use backend::offer::OfferDispatcher;
use backend::orchestrator::{CompleteRideInput, CreateRideInput, DispatchOrchestrator, LocationInput};
use backend::ride::model::{OfferStatus, RideStatus};
use backend::ride::repository::RideRepository;
use backend::ride::repository_sqlx::SqlxRideRepository;
use backend::ride::store::RideStore;
use backend::test_support::{TestCollaborators, WalletEvent};
use backend::time::now_ms;

const PICKUP: (f64, f64) = (12.9716, 77.5946);
const NEAR_PICKUP: (f64, f64) = (12.9720, 77.5950);
const DROPOFF: (f64, f64) = (12.9352, 77.6245);

/// Everything a scenario needs, wired like `main` but with tight timings.
struct World {
    repo: Arc<SqlxRideRepository>,
    ext: TestCollaborators,
    orch: Arc<DispatchOrchestrator>,
    _scanner: tokio::task::JoinHandle<()>,
}

fn fast_cfg() -> DispatchConfig {
    let mut cfg = DispatchConfig::from_env();
    cfg.batch_window_ms = 400;
    cfg.batch_scan_ms = 50;
    cfg.batch_delete_grace_ms = 100;
    cfg.offer_ttl_ms = 2_000;
    cfg.offer_poll_ms = 50;
    cfg.dispatch_deadline_ms = 3_000;
    cfg.radius_pause_ms = 50;
    cfg
}

async fn setup_world() -> World {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{}?mode=memory&cache=shared", db_name);
    let pool: AnyPool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn)
        .await
        .expect("connect sqlite memory db");
    schema::migrate(&pool).await.expect("migrate");

    let cfg = fast_cfg();
    let counters = Counters::default();
    let repo = Arc::new(SqlxRideRepository::new(pool));
    let store = Arc::new(RideStore::new(repo.clone(), cfg.busy_marker_ttl_ms));
    let ext = TestCollaborators::new();

    let collector = Arc::new(BatchCollector::new(
        cfg.batch_window_ms,
        cfg.max_batch_size,
        cfg.batch_scan_ms,
        cfg.batch_delete_grace_ms,
    ));
    let dispatcher = Arc::new(OfferDispatcher::new(
        store.clone(),
        ext.tracking.clone(),
        ext.ratings.clone(),
        ext.drivers.clone(),
        ext.notifier.clone(),
        counters.clone(),
        cfg.clone(),
    ));
    let orch = Arc::new(DispatchOrchestrator::new(
        store,
        collector.clone(),
        dispatcher,
        ext.as_collaborators(),
        counters,
        cfg,
    ));
    orch.register_batch_callback();
    let scanner = collector.spawn_expiry_scanner();

    World {
        repo,
        ext,
        orch,
        _scanner: scanner,
    }
}

fn ride_input(rider: Uuid) -> CreateRideInput {
    CreateRideInput {
        rider_id: rider,
        vehicle_class: "economy".to_string(),
        pickup: LocationInput {
            lat: PICKUP.0,
            lon: PICKUP.1,
            address: "MG Road".to_string(),
            saved_location_id: None,
        },
        dropoff: LocationInput {
            lat: DROPOFF.0,
            lon: DROPOFF.1,
            address: "Koramangala".to_string(),
            saved_location_id: None,
        },
        promo_code: None,
        scheduled_at_ms: None,
    }
}

fn stats(rating: f64, acceptance: f64, cancellation: f64, rides: u64) -> DriverRatingStats {
    DriverRatingStats {
        rating,
        acceptance_rate: acceptance,
        cancellation_rate: cancellation,
        total_rides: rides,
    }
}

/// Scenario: two near-simultaneous economy requests, three online drivers
/// with distinct quality. The batch pass assigns the two best; the third
/// driver is never promoted.
#[tokio::test(flavor = "multi_thread")]
async fn happy_path_batched_assigns_the_two_best_drivers() {
    let w = setup_world().await;

    let strong = Uuid::new_v4();
    let middle = Uuid::new_v4();
    let weak = Uuid::new_v4();
    w.ext.seed_driver(strong, 12.9726, 77.5946, "economy", stats(4.8, 0.95, 0.02, 500), now_ms());
    w.ext.seed_driver(middle, 12.9756, 77.5946, "economy", stats(4.0, 0.70, 0.15, 150), now_ms());
    w.ext.seed_driver(weak, 12.9796, 77.5946, "economy", stats(2.5, 0.30, 0.60, 40), now_ms());

    let a = w.orch.create_ride(ride_input(Uuid::new_v4())).await.unwrap();
    let mut second = ride_input(Uuid::new_v4());
    second.pickup.lat = NEAR_PICKUP.0;
    second.pickup.lon = NEAR_PICKUP.1;
    let b = w.orch.create_ride(second).await.unwrap();

    // Window (400ms) + scan + commit, with slack.
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let ride_a = w.repo.fetch_ride(&a.ride_id).await.unwrap().unwrap();
    let ride_b = w.repo.fetch_ride(&b.ride_id).await.unwrap().unwrap();
    assert_eq!(ride_a.status, RideStatus::Accepted);
    assert_eq!(ride_b.status, RideStatus::Accepted);

    let assigned = [ride_a.driver_id.unwrap(), ride_b.driver_id.unwrap()];
    assert!(assigned.contains(&strong));
    assert!(assigned.contains(&middle));
    assert!(!assigned.contains(&weak), "third driver untouched");

    // Promotion invariant: one accepted request per ride, zero pending.
    for ride_id in [a.ride_id, b.ride_id] {
        let requests = w.repo.requests_for_ride(&ride_id).await.unwrap();
        assert_eq!(
            requests.iter().filter(|r| r.status == OfferStatus::Accepted).count(),
            1,
            "exactly one accepted request"
        );
        assert!(requests.iter().all(|r| r.status != OfferStatus::Pending));
    }

    assert_eq!(w.ext.drivers.status_of(&strong), Some(DriverStatus::Busy));
    assert_eq!(w.ext.drivers.status_of(&middle), Some(DriverStatus::Busy));
    assert_eq!(w.ext.drivers.status_of(&weak), Some(DriverStatus::Online));
}

/// Scenario: two drivers race for the same ride. The first acceptance
/// holds; the second gets a clean `Conflict` and its offer is withdrawn.
#[tokio::test(flavor = "multi_thread")]
async fn race_lost_returns_conflict_to_the_second_driver() {
    let w = setup_world().await;

    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    w.ext.seed_driver(a, 12.9726, 77.5946, "economy", stats(4.6, 0.9, 0.05, 200), now_ms());
    w.ext.seed_driver(b, 12.9736, 77.5946, "economy", stats(4.6, 0.9, 0.05, 200), now_ms());
    w.ext.seed_driver(c, 12.9746, 77.5946, "economy", stats(4.6, 0.9, 0.05, 200), now_ms());

    let ride = w.orch.create_ride(ride_input(Uuid::new_v4())).await.unwrap();

    // Let the fan-out persist its offers.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let b_request = w
        .repo
        .fetch_open_request(&ride.ride_id, &b)
        .await
        .unwrap()
        .expect("offer to driver B");

    let accepted = w.orch.accept_ride(ride.ride_id, a).await.unwrap();
    assert_eq!(accepted.driver_id, Some(a));

    let err = w.orch.accept_ride(ride.ride_id, b).await.unwrap_err();
    assert!(matches!(err, DispatchError::Conflict(_)));

    let b_after = w.repo.fetch_request(&b_request.request_id).await.unwrap().unwrap();
    assert_eq!(b_after.status, OfferStatus::CancelledBySystem);

    let final_ride = w.repo.fetch_ride(&ride.ride_id).await.unwrap().unwrap();
    assert_eq!(final_ride.driver_id, Some(a), "winner keeps the ride");
}

/// Scenario: zero drivers at every radius. The ride is cancelled by the
/// system, the hold is released, the rider is told.
#[tokio::test(flavor = "multi_thread")]
async fn no_capacity_cancels_and_releases() {
    let w = setup_world().await;
    let rider = Uuid::new_v4();

    let ride = w.orch.create_ride(ride_input(rider)).await.unwrap();
    let hold = ride.wallet_hold_id.unwrap();

    tokio::time::sleep(Duration::from_millis(1_000)).await;

    let after = w.repo.fetch_ride(&ride.ride_id).await.unwrap().unwrap();
    assert_eq!(after.status, RideStatus::Cancelled);
    let c = after.cancellation.unwrap();
    assert_eq!(c.reason, "no drivers available");
    assert!(after.wallet_hold_id.is_none());
    assert!(w.ext.wallet.released(&hold));
    assert!(w.ext.notifier.statuses_for(&rider).contains(&"cancelled".to_string()));

    let requests = w.repo.requests_for_ride(&ride.ride_id).await.unwrap();
    assert!(requests.is_empty(), "no offers were ever sent");
}

/// Scenario: full lifecycle with a four-minute wait at the pickup and a
/// completion report 80 m from the dropoff.
#[tokio::test(flavor = "multi_thread")]
async fn completion_applies_surcharge_and_settles() {
    let w = setup_world().await;
    let rider = Uuid::new_v4();
    let driver = Uuid::new_v4();
    w.ext.seed_driver(driver, 12.9726, 77.5946, "economy", stats(4.6, 0.9, 0.05, 200), now_ms());

    let ride = w.orch.create_ride(ride_input(rider)).await.unwrap();
    let hold = ride.wallet_hold_id.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    w.orch.accept_ride(ride.ride_id, driver).await.unwrap();
    w.orch.driver_arrived(ride.ride_id, driver).await.unwrap();

    let pin = w.repo.fetch_ride(&ride.ride_id).await.unwrap().unwrap().rider_pin;
    w.orch.start_ride(ride.ride_id, driver, &pin).await.unwrap();

    // Re-stamp arrival/start four minutes apart: one chargeable minute.
    sqlx::query("UPDATE rides SET arrived_at_ms = ?, started_at_ms = ? WHERE ride_id = ?;")
        .bind(1_000_000i64)
        .bind(1_240_000i64)
        .bind(ride.ride_id.to_string())
        .execute(w.repo.pool())
        .await
        .unwrap();

    let done = w
        .orch
        .complete_ride(
            ride.ride_id,
            driver,
            CompleteRideInput {
                actual_distance_km: 12.3,
                actual_duration_secs: 1_800,
                driver_lat: DROPOFF.0 + 0.00072,
                driver_lon: DROPOFF.1,
            },
        )
        .await
        .unwrap();

    assert_eq!(done.status, RideStatus::Completed);
    // StaticPricing: (2 + 1.5 * 12.3) * 1.0 = 20.45, plus the 1.0 surcharge.
    let fare = done.actuals.fare.unwrap();
    assert!((fare - 21.45).abs() < 1e-9, "got {fare}");

    assert_eq!(w.ext.wallet.captures_for(&hold), vec![fare]);
    assert!(w.ext.wallet.events().iter().any(|e| matches!(
        e,
        WalletEvent::Credited { user_id, amount, .. }
            if *user_id == driver && (*amount - fare * 0.8).abs() < 1e-9
    )));
    assert_eq!(*w.ext.drivers.trips.lock().get(&driver).unwrap(), 1);
    assert_eq!(w.ext.drivers.status_of(&driver), Some(DriverStatus::Online));

    let final_ride = w.repo.fetch_ride(&ride.ride_id).await.unwrap().unwrap();
    assert!(final_ride.wallet_hold_id.is_none(), "hold fully settled");
}

/// Scenario: rider cancels an accepted ride. Fee captured from the hold,
/// credited to the driver, ride terminal, driver free again.
#[tokio::test(flavor = "multi_thread")]
async fn rider_cancellation_fee_while_accepted() {
    let w = setup_world().await;
    let rider = Uuid::new_v4();
    let driver = Uuid::new_v4();
    w.ext.seed_driver(driver, 12.9726, 77.5946, "economy", stats(4.6, 0.9, 0.05, 200), now_ms());

    let ride = w.orch.create_ride(ride_input(rider)).await.unwrap();
    let hold = ride.wallet_hold_id.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    w.orch.accept_ride(ride.ride_id, driver).await.unwrap();

    let cancelled = w.orch.cancel_ride(ride.ride_id, rider, None).await.unwrap();
    assert_eq!(cancelled.status, RideStatus::Cancelled);

    assert_eq!(w.ext.wallet.captures_for(&hold), vec![2.0]);
    assert!(w.ext.wallet.events().iter().any(|e| matches!(
        e,
        WalletEvent::Credited { user_id, amount, .. }
            if *user_id == driver && (*amount - 2.0).abs() < 1e-9
    )));
    assert_eq!(w.ext.drivers.status_of(&driver), Some(DriverStatus::Online));

    // No second charge on a repeat cancel.
    let events = w.ext.wallet.events().len();
    assert!(w.orch.cancel_ride(ride.ride_id, rider, None).await.is_err());
    assert_eq!(w.ext.wallet.events().len(), events);
}

/// Scenario: a ride scheduled for later takes no hold and does no batching
/// until its time arrives.
#[tokio::test(flavor = "multi_thread")]
async fn scheduled_ride_activates_on_time() {
    let w = setup_world().await;
    let rider = Uuid::new_v4();
    let driver = Uuid::new_v4();
    w.ext.seed_driver(driver, 12.9726, 77.5946, "economy", stats(4.8, 0.95, 0.02, 500), now_ms());

    let mut input = ride_input(rider);
    input.scheduled_at_ms = Some(now_ms() + 500);
    let ride = w.orch.create_ride(input).await.unwrap();

    assert_eq!(ride.status, RideStatus::Scheduled);
    assert!(ride.wallet_hold_id.is_none());
    assert!(w.ext.wallet.events().is_empty(), "hold deferred until activation");

    // Activation timer fires, then the batch window runs as usual.
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    let after = w.repo.fetch_ride(&ride.ride_id).await.unwrap().unwrap();
    assert_eq!(after.status, RideStatus::Accepted, "activated and dispatched");
    assert_eq!(after.driver_id, Some(driver));
    assert!(
        w.ext
            .wallet
            .events()
            .iter()
            .any(|e| matches!(e, WalletEvent::Held { .. })),
        "hold acquired at activation"
    );
    assert!(w.ext.notifier.statuses_for(&rider).contains(&"searching".to_string()));
}
