use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

use backend::db::schema;
use backend::ride::model::{
    CancelledBy, Location, OfferStatus, Ride, RideActuals, RideEstimate, RideRequest, RideStatus,
    RideTimestamps,
};
use backend::ride::repository::{RideRepository, RideRole};
use backend::ride::repository_sqlx::SqlxRideRepository;

/// Isolated in-memory DB per test.
/// Unique name prevents test interference during parallel execution;
/// `cache=shared` lets every connection in the pool see the same data.
async fn setup_repo() -> SqlxRideRepository {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{}?mode=memory&cache=shared", db_name);

    let pool: AnyPool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn)
        .await
        .expect("connect sqlite memory db");

    schema::migrate(&pool).await.expect("migrate");

    SqlxRideRepository::new(pool)
}

fn mk_ride(status: RideStatus) -> Ride {
    Ride {
        ride_id: Uuid::new_v4(),
        rider_id: Uuid::new_v4(),
        driver_id: None,
        vehicle_class: "economy".to_string(),
        status,
        pickup: Location {
            lat: 12.9716,
            lon: 77.5946,
            address: "MG Road".to_string(),
        },
        dropoff: Location {
            lat: 12.9352,
            lon: 77.6245,
            address: "Koramangala".to_string(),
        },
        estimate: RideEstimate {
            distance_km: 5.6,
            duration_secs: 840,
            fare: 10.4,
            surge_multiplier: 1.2,
        },
        actuals: RideActuals::default(),
        wallet_hold_id: None,
        rider_pin: "4821".to_string(),
        timestamps: RideTimestamps {
            requested_at_ms: 1_700_000_000_000,
            ..Default::default()
        },
        cancellation: None,
    }
}

fn mk_request(ride_id: Uuid, driver_id: Uuid, sent_at_ms: u64) -> RideRequest {
    RideRequest {
        request_id: Uuid::new_v4(),
        ride_id,
        driver_id,
        status: OfferStatus::Pending,
        sent_at_ms,
        expires_at_ms: sent_at_ms + 10_000,
        responded_at_ms: None,
    }
}

#[tokio::test]
async fn ride_round_trips_through_the_row_mapping() {
    let repo = setup_repo().await;

    let mut ride = mk_ride(RideStatus::Scheduled);
    ride.wallet_hold_id = Some(Uuid::new_v4());
    ride.timestamps.scheduled_at_ms = Some(1_700_000_900_000);
    repo.create_ride(&ride).await.unwrap();

    let loaded = repo.fetch_ride(&ride.ride_id).await.unwrap().unwrap();
    assert_eq!(loaded.ride_id, ride.ride_id);
    assert_eq!(loaded.rider_id, ride.rider_id);
    assert_eq!(loaded.status, RideStatus::Scheduled);
    assert_eq!(loaded.driver_id, None);
    assert_eq!(loaded.wallet_hold_id, ride.wallet_hold_id);
    assert_eq!(loaded.rider_pin, "4821");
    assert_eq!(loaded.pickup, ride.pickup);
    assert_eq!(loaded.dropoff, ride.dropoff);
    assert_eq!(loaded.estimate.duration_secs, 840);
    assert!((loaded.estimate.surge_multiplier - 1.2).abs() < 1e-9);
    assert_eq!(loaded.timestamps.scheduled_at_ms, Some(1_700_000_900_000));
    assert_eq!(loaded.timestamps.accepted_at_ms, None);
    assert!(loaded.actuals.fare.is_none());
    assert!(loaded.cancellation.is_none());

    assert!(repo.fetch_ride(&Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn accept_promotion_is_exactly_once_under_contention() {
    let repo = Arc::new(setup_repo().await);

    let ride = mk_ride(RideStatus::Searching);
    repo.create_ride(&ride).await.unwrap();

    let mut set = JoinSet::new();
    for i in 0..10u64 {
        let repo = Arc::clone(&repo);
        let ride_id = ride.ride_id;
        set.spawn(async move {
            let driver = Uuid::new_v4();
            let won = repo.try_accept(&ride_id, &driver, 1_700_000_100_000 + i).await.unwrap();
            (driver, won)
        });
    }

    let mut winners = Vec::new();
    while let Some(res) = set.join_next().await {
        let (driver, won) = res.unwrap();
        if won {
            winners.push(driver);
        }
    }

    assert_eq!(winners.len(), 1, "exactly one driver wins the promotion");

    let after = repo.fetch_ride(&ride.ride_id).await.unwrap().unwrap();
    assert_eq!(after.status, RideStatus::Accepted);
    assert_eq!(after.driver_id, Some(winners[0]));
    assert!(after.timestamps.accepted_at_ms.is_some());
}

#[tokio::test]
async fn transitions_are_guarded_by_observed_status() {
    let repo = setup_repo().await;

    let ride = mk_ride(RideStatus::Searching);
    repo.create_ride(&ride).await.unwrap();

    // Arrived requires accepted.
    assert!(
        !repo
            .transition_status(&ride.ride_id, RideStatus::Accepted, RideStatus::Arrived, 2)
            .await
            .unwrap()
    );

    let driver = Uuid::new_v4();
    assert!(repo.try_accept(&ride.ride_id, &driver, 10).await.unwrap());
    assert!(
        repo.transition_status(&ride.ride_id, RideStatus::Accepted, RideStatus::Arrived, 20)
            .await
            .unwrap()
    );
    assert!(
        repo.transition_status(&ride.ride_id, RideStatus::Arrived, RideStatus::Started, 30)
            .await
            .unwrap()
    );

    let loaded = repo.fetch_ride(&ride.ride_id).await.unwrap().unwrap();
    assert_eq!(loaded.timestamps.accepted_at_ms, Some(10));
    assert_eq!(loaded.timestamps.arrived_at_ms, Some(20));
    assert_eq!(loaded.timestamps.started_at_ms, Some(30));

    // Completion writes the actuals in the same guarded statement.
    let actuals = RideActuals {
        distance_km: Some(12.3),
        duration_secs: Some(1_800),
        fare: Some(21.45),
        driver_payout: Some(17.16),
        rider_payable: Some(21.45),
    };
    assert!(repo.complete_ride(&ride.ride_id, &actuals, 40).await.unwrap());
    // A second completion finds no started row.
    assert!(!repo.complete_ride(&ride.ride_id, &actuals, 41).await.unwrap());

    let done = repo.fetch_ride(&ride.ride_id).await.unwrap().unwrap();
    assert_eq!(done.status, RideStatus::Completed);
    assert_eq!(done.actuals.distance_km, Some(12.3));
    assert_eq!(done.actuals.duration_secs, Some(1_800));
    assert_eq!(done.timestamps.completed_at_ms, Some(40));
}

#[tokio::test]
async fn cancellation_records_party_and_is_single_shot() {
    let repo = setup_repo().await;

    let ride = mk_ride(RideStatus::Searching);
    repo.create_ride(&ride).await.unwrap();

    assert!(
        repo.cancel_ride(
            &ride.ride_id,
            RideStatus::Searching,
            CancelledBy::Rider,
            "changed my mind",
            50,
        )
        .await
        .unwrap()
    );

    // Second cancel observes a different status and misses.
    assert!(
        !repo
            .cancel_ride(
                &ride.ride_id,
                RideStatus::Searching,
                CancelledBy::Rider,
                "again",
                51,
            )
            .await
            .unwrap()
    );

    let loaded = repo.fetch_ride(&ride.ride_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, RideStatus::Cancelled);
    let c = loaded.cancellation.unwrap();
    assert_eq!(c.by, CancelledBy::Rider);
    assert_eq!(c.reason, "changed my mind");
    assert_eq!(loaded.timestamps.cancelled_at_ms, Some(50));
}

#[tokio::test]
async fn request_lifecycle_siblings_and_expiry() {
    let repo = setup_repo().await;

    let ride = mk_ride(RideStatus::Searching);
    repo.create_ride(&ride).await.unwrap();

    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let req_a = mk_request(ride.ride_id, a, 1_000);
    let req_b = mk_request(ride.ride_id, b, 1_001);
    let req_c = mk_request(ride.ride_id, c, 1_002);
    for r in [&req_a, &req_b, &req_c] {
        repo.create_request(r).await.unwrap();
    }

    // Open request lookup per (ride, driver).
    let open = repo.fetch_open_request(&ride.ride_id, &b).await.unwrap().unwrap();
    assert_eq!(open.request_id, req_b.request_id);

    // A accepts: guarded flip with responded_at.
    assert!(
        repo.update_request_status(
            &req_a.request_id,
            OfferStatus::Pending,
            OfferStatus::Accepted,
            Some(4_000),
        )
        .await
        .unwrap()
    );
    // Flipping again from pending misses.
    assert!(
        !repo
            .update_request_status(
                &req_a.request_id,
                OfferStatus::Pending,
                OfferStatus::Accepted,
                Some(4_001),
            )
            .await
            .unwrap()
    );

    // Winner's sibling sweep.
    let cancelled = repo
        .cancel_sibling_requests(&ride.ride_id, &req_a.request_id, 5_000)
        .await
        .unwrap();
    assert_eq!(cancelled, 2);

    let all = repo.requests_for_ride(&ride.ride_id).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(
        all.iter().filter(|r| r.status == OfferStatus::Accepted).count(),
        1
    );
    assert_eq!(
        all.iter()
            .filter(|r| r.status == OfferStatus::CancelledBySystem)
            .count(),
        2
    );
    assert!(repo.fetch_open_request(&ride.ride_id, &b).await.unwrap().is_none());

    // The sweeper flips overdue pending offers on another ride.
    let other = mk_ride(RideStatus::Searching);
    repo.create_ride(&other).await.unwrap();
    let overdue = mk_request(other.ride_id, Uuid::new_v4(), 1_000);
    repo.create_request(&overdue).await.unwrap();

    // Exactly at the deadline counts as expired.
    assert_eq!(repo.expire_overdue_requests(overdue.expires_at_ms).await.unwrap(), 1);
    let swept = repo.fetch_request(&overdue.request_id).await.unwrap().unwrap();
    assert_eq!(swept.status, OfferStatus::Expired);
}

#[tokio::test]
async fn listing_filters_by_role_and_status() {
    let repo = setup_repo().await;

    let rider = Uuid::new_v4();
    let driver = Uuid::new_v4();

    for i in 0..3u64 {
        let mut ride = mk_ride(RideStatus::Searching);
        ride.rider_id = rider;
        ride.timestamps.requested_at_ms = 1_000 + i;
        repo.create_ride(&ride).await.unwrap();
        if i == 0 {
            assert!(repo.try_accept(&ride.ride_id, &driver, 2_000).await.unwrap());
        }
    }

    let all = repo
        .list_rides(&rider, RideRole::Rider, None, 10, 0)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    // Newest first.
    assert!(all[0].timestamps.requested_at_ms >= all[2].timestamps.requested_at_ms);

    let searching = repo
        .list_rides(&rider, RideRole::Rider, Some(RideStatus::Searching), 10, 0)
        .await
        .unwrap();
    assert_eq!(searching.len(), 2);

    let driving = repo
        .list_rides(&driver, RideRole::Driver, None, 10, 0)
        .await
        .unwrap();
    assert_eq!(driving.len(), 1);
    assert_eq!(driving[0].driver_id, Some(driver));

    let paged = repo
        .list_rides(&rider, RideRole::Rider, None, 2, 2)
        .await
        .unwrap();
    assert_eq!(paged.len(), 1);
}

#[tokio::test]
async fn stuck_holds_and_due_scheduled_queries() {
    let repo = setup_repo().await;

    // Terminal ride still holding money.
    let mut stuck = mk_ride(RideStatus::Searching);
    stuck.wallet_hold_id = Some(Uuid::new_v4());
    repo.create_ride(&stuck).await.unwrap();
    assert!(
        repo.cancel_ride(&stuck.ride_id, RideStatus::Searching, CancelledBy::System, "x", 1)
            .await
            .unwrap()
    );

    // Healthy terminal ride: hold already cleared.
    let mut clean = mk_ride(RideStatus::Searching);
    clean.wallet_hold_id = Some(Uuid::new_v4());
    repo.create_ride(&clean).await.unwrap();
    assert!(
        repo.cancel_ride(&clean.ride_id, RideStatus::Searching, CancelledBy::Rider, "y", 2)
            .await
            .unwrap()
    );
    repo.set_wallet_hold(&clean.ride_id, None).await.unwrap();

    let found = repo.rides_with_stuck_holds(10).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].ride_id, stuck.ride_id);

    // Scheduled rides come due by timestamp.
    let mut due = mk_ride(RideStatus::Scheduled);
    due.timestamps.scheduled_at_ms = Some(5_000);
    repo.create_ride(&due).await.unwrap();

    let mut later = mk_ride(RideStatus::Scheduled);
    later.timestamps.scheduled_at_ms = Some(50_000);
    repo.create_ride(&later).await.unwrap();

    let ready = repo.fetch_due_scheduled(10_000, 10).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].ride_id, due.ride_id);
}
