use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::cache::{MarkerCache, active_ride_key, driver_active_ride_key, driver_busy_key};
use crate::logger::warn_if_slow;
use crate::ride::model::{CancelledBy, OfferStatus, Ride, RideActuals, RideRequest, RideStatus};
use crate::ride::repository::RideRepository;

/// Dispatch-facing ride store: repository access with slow-call logging,
/// plus the TTL'd busy/active markers.
///
/// Writers go through the repository's conditional updates; the markers are
/// advisory read-side state and may lag the database.
pub struct RideStore {
    pub repo: Arc<dyn RideRepository>,
    markers: MarkerCache,
    busy_ttl_ms: u64,
}

impl RideStore {
    pub fn new(repo: Arc<dyn RideRepository>, busy_ttl_ms: u64) -> Self {
        Self {
            repo,
            markers: MarkerCache::new(10_000),
            busy_ttl_ms,
        }
    }

    #[instrument(skip(self), target = "store", fields(ride_id = %ride_id))]
    pub async fn ride(&self, ride_id: &Uuid) -> Result<Option<Ride>> {
        warn_if_slow("db_fetch_ride", Duration::from_millis(100), async {
            self.repo.fetch_ride(ride_id).await
        })
        .await
        .context("repository fetch failed")
    }

    #[instrument(skip(self), target = "store", fields(ride_id = %ride_id, driver_id = %driver_user_id))]
    pub async fn try_accept(
        &self,
        ride_id: &Uuid,
        driver_user_id: &Uuid,
        now_ms: u64,
    ) -> Result<bool> {
        warn_if_slow("db_try_accept", Duration::from_millis(100), async {
            self.repo.try_accept(ride_id, driver_user_id, now_ms).await
        })
        .await
        .context("accept promotion failed")
    }

    pub async fn transition_status(
        &self,
        ride_id: &Uuid,
        from: RideStatus,
        to: RideStatus,
        now_ms: u64,
    ) -> Result<bool> {
        warn_if_slow("db_transition_status", Duration::from_millis(100), async {
            self.repo.transition_status(ride_id, from, to, now_ms).await
        })
        .await
        .context("status transition failed")
    }

    pub async fn complete_ride(
        &self,
        ride_id: &Uuid,
        actuals: &RideActuals,
        now_ms: u64,
    ) -> Result<bool> {
        warn_if_slow("db_complete_ride", Duration::from_millis(100), async {
            self.repo.complete_ride(ride_id, actuals, now_ms).await
        })
        .await
        .context("completion failed")
    }

    pub async fn cancel_ride(
        &self,
        ride_id: &Uuid,
        from: RideStatus,
        by: CancelledBy,
        reason: &str,
        now_ms: u64,
    ) -> Result<bool> {
        warn_if_slow("db_cancel_ride", Duration::from_millis(100), async {
            self.repo.cancel_ride(ride_id, from, by, reason, now_ms).await
        })
        .await
        .context("cancellation failed")
    }

    pub async fn update_request_status(
        &self,
        request_id: &Uuid,
        from: OfferStatus,
        to: OfferStatus,
        responded_at_ms: Option<u64>,
    ) -> Result<bool> {
        warn_if_slow("db_update_request", Duration::from_millis(100), async {
            self.repo
                .update_request_status(request_id, from, to, responded_at_ms)
                .await
        })
        .await
        .context("request transition failed")
    }

    pub async fn open_request(
        &self,
        ride_id: &Uuid,
        driver_user_id: &Uuid,
    ) -> Result<Option<RideRequest>> {
        self.repo.fetch_open_request(ride_id, driver_user_id).await
    }

    // ---- markers ----

    /// Mark the driver busy and bind the active-ride keys. TTL bounds the
    /// damage of a crash mid-ride.
    pub fn mark_driver_busy(&self, driver_user_id: &Uuid, ride_id: &Uuid, now_ms: u64) {
        self.markers.put(
            driver_busy_key(driver_user_id),
            "1",
            self.busy_ttl_ms,
            now_ms,
        );
        self.markers.put(
            driver_active_ride_key(driver_user_id),
            ride_id.to_string(),
            self.busy_ttl_ms,
            now_ms,
        );
        self.markers.put(
            active_ride_key(ride_id),
            driver_user_id.to_string(),
            self.busy_ttl_ms,
            now_ms,
        );
        debug!(driver_id = %driver_user_id, ride_id = %ride_id, "driver marked busy");
    }

    pub fn clear_driver_markers(&self, driver_user_id: &Uuid, ride_id: &Uuid) {
        self.markers.remove(&driver_busy_key(driver_user_id));
        self.markers.remove(&driver_active_ride_key(driver_user_id));
        self.markers.remove(&active_ride_key(ride_id));
    }

    pub fn driver_busy(&self, driver_user_id: &Uuid, now_ms: u64) -> bool {
        self.markers
            .get(&driver_busy_key(driver_user_id), now_ms)
            .is_some()
    }

    pub fn active_ride_for_driver(&self, driver_user_id: &Uuid, now_ms: u64) -> Option<Uuid> {
        self.markers
            .get(&driver_active_ride_key(driver_user_id), now_ms)
            .and_then(|s| Uuid::parse_str(&s).ok())
    }

    pub fn purge_expired_markers(&self, now_ms: u64) -> usize {
        self.markers.purge_expired(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ride::model::{Location, RideEstimate, RideTimestamps};
    use crate::ride::repository::RideRepository as _;
    use crate::test_support::InMemoryRideRepository;

    fn mk_ride(id: Uuid) -> Ride {
        Ride {
            ride_id: id,
            rider_id: Uuid::new_v4(),
            driver_id: None,
            vehicle_class: "economy".to_string(),
            status: RideStatus::Searching,
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
                distance_km: 3.2,
                duration_secs: 480,
                fare: 6.5,
                surge_multiplier: 1.0,
            },
            actuals: Default::default(),
            wallet_hold_id: None,
            rider_pin: "1234".into(),
            timestamps: RideTimestamps {
                requested_at_ms: 1_000,
                ..Default::default()
            },
            cancellation: None,
        }
    }

    #[tokio::test]
    async fn accept_is_exactly_once_through_the_store() {
        let repo = Arc::new(InMemoryRideRepository::default());
        let store = RideStore::new(repo.clone(), 60_000);

        let ride_id = Uuid::new_v4();
        repo.create_ride(&mk_ride(ride_id)).await.unwrap();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(store.try_accept(&ride_id, &a, 2_000).await.unwrap());
        assert!(!store.try_accept(&ride_id, &b, 2_001).await.unwrap());

        let ride = store.ride(&ride_id).await.unwrap().unwrap();
        assert_eq!(ride.driver_id, Some(a));
        assert_eq!(ride.timestamps.accepted_at_ms, Some(2_000));
    }

    #[tokio::test]
    async fn markers_round_trip_and_expire() {
        let repo = Arc::new(InMemoryRideRepository::default());
        let store = RideStore::new(repo, 1_000);

        let driver = Uuid::new_v4();
        let ride = Uuid::new_v4();

        store.mark_driver_busy(&driver, &ride, 10_000);
        assert!(store.driver_busy(&driver, 10_500));
        assert_eq!(store.active_ride_for_driver(&driver, 10_500), Some(ride));

        // Past the TTL the markers vanish on their own.
        assert!(!store.driver_busy(&driver, 11_000));

        store.mark_driver_busy(&driver, &ride, 20_000);
        store.clear_driver_markers(&driver, &ride);
        assert!(!store.driver_busy(&driver, 20_001));
    }
}
