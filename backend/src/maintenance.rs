//! Background sweepers. Each loop is independent, logs its failures, and
//! never retries a tick: stuck state is handled explicitly on the next pass.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::contracts::tracking::Tracking;
use crate::contracts::wallet::Wallet;
use crate::metrics::Counters;
use crate::orchestrator::DispatchOrchestrator;
use crate::ride::store::RideStore;
use crate::time::now_ms;

const HOLD_SWEEP_BATCH: usize = 100;
const SCHEDULED_CATCHUP_BATCH: usize = 50;

/// Expire pending offers whose deadline passed, and drop expired busy
/// markers along the way.
pub fn start_request_sweeper(
    store: Arc<RideStore>,
    counters: Counters,
    every_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(every_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let now = now_ms();

            match store.repo.expire_overdue_requests(now).await {
                Ok(0) => {}
                Ok(n) => {
                    counters.requests_swept.fetch_add(n, Ordering::Relaxed);
                    counters.offers_expired.fetch_add(n, Ordering::Relaxed);
                    info!(expired = n, "overdue offers expired");
                }
                Err(e) => error!(error = %e, "request sweep failed"),
            }

            let purged = store.purge_expired_markers(now);
            if purged > 0 {
                debug!(purged, "expired busy markers dropped");
            }
        }
    })
}

/// Release holds still attached to terminal rides. Subsidiary to the hold's
/// own TTL: this just shortens how long money stays stuck after a crash.
pub fn start_hold_sweeper(
    store: Arc<RideStore>,
    wallet: Arc<dyn Wallet>,
    counters: Counters,
    every_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(every_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;

            let stuck = match store.repo.rides_with_stuck_holds(HOLD_SWEEP_BATCH).await {
                Ok(rides) => rides,
                Err(e) => {
                    error!(error = %e, "stuck-hold scan failed");
                    continue;
                }
            };

            for ride in stuck {
                let Some(hold) = ride.wallet_hold_id else {
                    continue;
                };
                match wallet.release_hold(hold).await {
                    Ok(()) => {
                        if let Err(e) = store.repo.set_wallet_hold(&ride.ride_id, None).await {
                            warn!(ride_id = %ride.ride_id, error = %e, "clearing swept hold reference failed");
                            continue;
                        }
                        counters.holds_released.fetch_add(1, Ordering::Relaxed);
                        info!(ride_id = %ride.ride_id, hold_id = %hold, "stuck hold released");
                    }
                    Err(e) => {
                        warn!(ride_id = %ride.ride_id, hold_id = %hold, error = %e, "stuck hold release failed")
                    }
                }
            }
        }
    })
}

/// Prune tracked driver locations that have gone stale.
pub fn start_location_sweeper(
    tracking: Arc<dyn Tracking>,
    counters: Counters,
    every_ms: u64,
    stale_after_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(every_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let cutoff = now_ms().saturating_sub(stale_after_ms);
            match tracking.prune_stale(cutoff).await {
                Ok(0) => {}
                Ok(n) => {
                    counters.locations_pruned.fetch_add(n as u64, Ordering::Relaxed);
                    debug!(pruned = n, "stale driver locations removed");
                }
                Err(e) => error!(error = %e, "location prune failed"),
            }
        }
    })
}

/// Catch-up for scheduled rides whose per-ride activation timer was lost
/// (process restart): anything past due is activated on the next pass.
pub fn start_scheduled_catchup(
    orchestrator: Arc<DispatchOrchestrator>,
    store: Arc<RideStore>,
    every_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(every_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;

            let due = match store
                .repo
                .fetch_due_scheduled(now_ms(), SCHEDULED_CATCHUP_BATCH)
                .await
            {
                Ok(rides) => rides,
                Err(e) => {
                    error!(error = %e, "scheduled catch-up scan failed");
                    continue;
                }
            };

            for ride in due {
                if let Err(e) = orchestrator.activate_scheduled(ride.ride_id).await {
                    warn!(ride_id = %ride.ride_id, error = %e, "catch-up activation failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ride::model::{OfferStatus, RideRequest};
    use crate::ride::repository::RideRepository;
    use crate::test_support::{InMemoryRideRepository, TestCollaborators};
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn overdue_offers_are_expired() {
        let repo = Arc::new(InMemoryRideRepository::default());
        let store = Arc::new(RideStore::new(repo.clone(), 60_000));
        let counters = Counters::default();

        let overdue = RideRequest {
            request_id: Uuid::new_v4(),
            ride_id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            status: OfferStatus::Pending,
            sent_at_ms: 0,
            expires_at_ms: 1,
            responded_at_ms: None,
        };
        repo.create_request(&overdue).await.unwrap();

        let handle = start_request_sweeper(store, counters.clone(), 10_000);
        tokio::time::sleep(Duration::from_millis(10_100)).await;

        assert_eq!(
            repo.request_snapshot(&overdue.request_id).unwrap().status,
            OfferStatus::Expired
        );
        assert!(counters.requests_swept.load(Ordering::Relaxed) >= 1);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_holds_are_released() {
        use crate::ride::model::{
            CancelledBy, Cancellation, Location, Ride, RideEstimate, RideStatus, RideTimestamps,
        };

        let repo = Arc::new(InMemoryRideRepository::default());
        let store = Arc::new(RideStore::new(repo.clone(), 60_000));
        let world = TestCollaborators::new();
        let counters = Counters::default();

        let hold = Uuid::new_v4();
        let ride = Ride {
            ride_id: Uuid::new_v4(),
            rider_id: Uuid::new_v4(),
            driver_id: None,
            vehicle_class: "economy".into(),
            status: RideStatus::Cancelled,
            pickup: Location {
                lat: 12.97,
                lon: 77.59,
                address: "A".into(),
            },
            dropoff: Location {
                lat: 12.99,
                lon: 77.61,
                address: "B".into(),
            },
            estimate: RideEstimate {
                distance_km: 3.0,
                duration_secs: 450,
                fare: 6.5,
                surge_multiplier: 1.0,
            },
            actuals: Default::default(),
            wallet_hold_id: Some(hold),
            rider_pin: "1234".into(),
            timestamps: RideTimestamps {
                requested_at_ms: 1,
                cancelled_at_ms: Some(2),
                ..Default::default()
            },
            cancellation: Some(Cancellation {
                by: CancelledBy::System,
                reason: "crash".into(),
            }),
        };
        repo.create_ride(&ride).await.unwrap();

        let handle = start_hold_sweeper(store, world.wallet.clone(), counters.clone(), 300_000);
        tokio::time::sleep(Duration::from_millis(300_100)).await;

        assert!(world.wallet.released(&hold));
        assert!(repo.ride_snapshot(&ride.ride_id).unwrap().wallet_hold_id.is_none());
        assert_eq!(counters.holds_released.load(Ordering::Relaxed), 1);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stale_locations_are_pruned() {
        let world = TestCollaborators::new();
        let counters = Counters::default();

        // One stale fixture, one fresh.
        world
            .tracking
            .add_driver(Uuid::new_v4(), 12.97, 77.59, "economy", true, 0);
        world
            .tracking
            .add_driver(Uuid::new_v4(), 12.98, 77.60, "economy", true, now_ms());

        let handle =
            start_location_sweeper(world.tracking.clone(), counters.clone(), 60_000, 120_000);
        tokio::time::sleep(Duration::from_millis(60_100)).await;

        assert_eq!(counters.locations_pruned.load(Ordering::Relaxed), 1);
        handle.abort();
    }
}
