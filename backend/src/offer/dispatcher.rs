//! Offer dispatcher: the fallback path that searches expanding radii,
//! fans out individual timed offers, and atomically commits the first
//! acceptance.
//!
//! Concurrency shape:
//! - one task per offer, polling at 1 Hz
//! - a single-slot winner channel; the first `try_send` wins
//! - a 30 s deadline over the whole attempt; losers unwind by marking
//!   their requests `cancelled_by_system`
//!
//! The commit path is the atomic `searching -> accepted` promotion. A CAS
//! miss rolls the already-accepted request back to `pending` so the true
//! winner is unaffected, and surfaces the lost race as `Conflict`.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::contracts::drivers::{DriverStatus, Drivers};
use crate::contracts::notifier::{
    Notifier, RideAcceptedPayload, RideLocationPayload, RideOfferPayload,
};
use crate::contracts::ratings::Ratings;
use crate::contracts::tracking::{TrackedDriver, Tracking};
use crate::error::{DispatchError, DispatchResult};
use crate::geo;
use crate::metrics::Counters;
use crate::ride::model::{OfferStatus, Ride, RideRequest, RideStatus};
use crate::ride::store::RideStore;
use crate::time::now_ms;

/// Search radii by rider rating. Better-rated riders get tighter first
/// passes; low-rated riders go straight to the widest net.
pub fn radius_ladder_km(rider_rating: f64) -> &'static [f64] {
    if rider_rating >= 4.0 {
        &[3.0, 5.0, 8.0]
    } else if rider_rating >= 3.5 {
        &[5.0, 8.0]
    } else {
        &[8.0]
    }
}

pub struct OfferDispatcher {
    store: Arc<RideStore>,
    tracking: Arc<dyn Tracking>,
    ratings: Arc<dyn Ratings>,
    drivers: Arc<dyn Drivers>,
    notifier: Arc<dyn Notifier>,
    counters: Counters,
    cfg: DispatchConfig,
}

impl OfferDispatcher {
    pub fn new(
        store: Arc<RideStore>,
        tracking: Arc<dyn Tracking>,
        ratings: Arc<dyn Ratings>,
        drivers: Arc<dyn Drivers>,
        notifier: Arc<dyn Notifier>,
        counters: Counters,
        cfg: DispatchConfig,
    ) -> Self {
        Self {
            store,
            tracking,
            ratings,
            drivers,
            notifier,
            counters,
            cfg,
        }
    }

    /// Run one dispatch attempt for a searching ride, bounded by the
    /// overall deadline. Returns the winning driver's user id.
    #[instrument(skip(self), target = "offer", fields(ride_id = %ride_id))]
    pub async fn dispatch(&self, ride_id: Uuid) -> DispatchResult<Uuid> {
        let deadline = Duration::from_millis(self.cfg.dispatch_deadline_ms);

        match tokio::time::timeout(deadline, self.dispatch_inner(ride_id)).await {
            Ok(res) => res,
            Err(_) => {
                self.counters
                    .dispatch_no_capacity
                    .fetch_add(1, Ordering::Relaxed);
                // Offer tasks were dropped mid-poll; close out whatever
                // they left pending.
                if let Err(e) = self
                    .store
                    .repo
                    .cancel_sibling_requests(&ride_id, &Uuid::nil(), now_ms())
                    .await
                {
                    warn!(ride_id = %ride_id, error = %e, "failed to cancel offers after deadline");
                }
                Err(DispatchError::no_capacity("no driver accepted"))
            }
        }
    }

    async fn dispatch_inner(&self, ride_id: Uuid) -> DispatchResult<Uuid> {
        let ride = self
            .store
            .ride(&ride_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ride"))?;

        if ride.status != RideStatus::Searching {
            return Err(DispatchError::conflict("ride is not searching"));
        }

        let rider_rating = self.ratings.rider_rating(ride.rider_id).await?;
        let radii = radius_ladder_km(rider_rating);

        for (i, radius_km) in radii.iter().enumerate() {
            if i > 0 {
                // Let driver locations refresh between widenings.
                tokio::time::sleep(Duration::from_millis(self.cfg.radius_pause_ms)).await;
            }

            let candidates = self
                .tracking
                .find_nearby_drivers(
                    ride.pickup.lat,
                    ride.pickup.lon,
                    *radius_km,
                    &ride.vehicle_class,
                    true,
                    self.cfg.candidate_limit,
                )
                .await?;

            debug!(
                radius_km,
                found = candidates.len(),
                rider_rating,
                "radius search"
            );

            if candidates.is_empty() {
                continue;
            }

            let fanout: Vec<TrackedDriver> = candidates
                .into_iter()
                .take(self.cfg.offer_fanout)
                .collect();
            return self.fan_out(&ride, fanout).await;
        }

        self.counters
            .dispatch_no_capacity
            .fetch_add(1, Ordering::Relaxed);
        Err(DispatchError::no_capacity("no drivers available"))
    }

    async fn fan_out(&self, ride: &Ride, candidates: Vec<TrackedDriver>) -> DispatchResult<Uuid> {
        // Single-slot channel: the first offer task to deliver wins.
        let (winner_tx, mut winner_rx) = mpsc::channel::<(Uuid, Uuid)>(1);
        let mut tasks = JoinSet::new();

        for candidate in candidates {
            let sent_at_ms = now_ms();
            let request = RideRequest {
                request_id: Uuid::new_v4(),
                ride_id: ride.ride_id,
                driver_id: candidate.driver_id,
                status: OfferStatus::Pending,
                sent_at_ms,
                expires_at_ms: sent_at_ms + self.cfg.offer_ttl_ms,
                responded_at_ms: None,
            };
            self.store.repo.create_request(&request).await?;
            self.counters.offers_sent.fetch_add(1, Ordering::Relaxed);

            let distance_km = geo::haversine_km(
                ride.pickup.lat,
                ride.pickup.lon,
                candidate.lat,
                candidate.lon,
            );
            let payload = RideOfferPayload {
                ride_id: ride.ride_id,
                request_id: request.request_id,
                pickup_address: ride.pickup.address.clone(),
                pickup_lat: ride.pickup.lat,
                pickup_lon: ride.pickup.lon,
                dropoff_address: ride.dropoff.address.clone(),
                dropoff_lat: ride.dropoff.lat,
                dropoff_lon: ride.dropoff.lon,
                fare_estimate: ride.estimate.fare,
                distance_to_pickup_km: distance_km,
                pickup_eta_secs: geo::eta_secs(distance_km, self.cfg.average_speed_kmh),
                expires_in_secs: self.cfg.offer_ttl_ms / 1_000,
                sent_at: chrono::Utc::now(),
            };
            if let Err(e) = self
                .notifier
                .send_ride_request(candidate.driver_id, payload)
                .await
            {
                // Delivery is best-effort; the offer still stands until it
                // expires.
                warn!(
                    driver_id = %candidate.driver_id,
                    error = %e,
                    "offer notification failed"
                );
            }

            tasks.spawn(poll_offer(
                self.store.clone(),
                ride.ride_id,
                request.request_id,
                candidate.driver_id,
                self.cfg.offer_poll_ms,
                winner_tx.clone(),
            ));
        }

        // Only the offer tasks hold senders now; `None` from the channel
        // means every offer concluded without an acceptance.
        drop(winner_tx);

        match winner_rx.recv().await {
            Some((driver_id, request_id)) => {
                tasks.abort_all();
                self.commit_win(&ride.ride_id, driver_id, request_id).await
            }
            None => {
                // Distinguish "someone else took the ride" from "nobody
                // wanted it".
                let current = self.store.ride(&ride.ride_id).await?;
                match current {
                    Some(r) if r.status != RideStatus::Searching => {
                        Err(DispatchError::conflict("ride already accepted"))
                    }
                    _ => {
                        self.counters
                            .dispatch_no_capacity
                            .fetch_add(1, Ordering::Relaxed);
                        Err(DispatchError::no_capacity("no driver accepted"))
                    }
                }
            }
        }
    }

    async fn commit_win(
        &self,
        ride_id: &Uuid,
        driver_id: Uuid,
        request_id: Uuid,
    ) -> DispatchResult<Uuid> {
        if let Some(r) = self.store.ride(ride_id).await? {
            if r.status == RideStatus::Accepted && r.driver_is(&driver_id) {
                // The accept action already ran the full commit.
                return Ok(driver_id);
            }
        }
        self.commit_acceptance(ride_id, &request_id, &driver_id)
            .await?;
        Ok(driver_id)
    }

    /// Commit a driver's acceptance: the atomic promotion plus the win
    /// bookkeeping. The request must already be in `accepted`.
    ///
    /// On a CAS miss the request is rolled back to `pending` — the true
    /// winner's sibling sweep will dispose of it — and the lost race is
    /// reported as `Conflict`.
    pub async fn commit_acceptance(
        &self,
        ride_id: &Uuid,
        request_id: &Uuid,
        driver_user_id: &Uuid,
    ) -> DispatchResult<()> {
        let now = now_ms();
        let won = self.store.try_accept(ride_id, driver_user_id, now).await?;

        if !won {
            // The poll loop and the accept action can race each other to
            // this commit; losing to *our own driver* is still a win.
            if let Some(r) = self.store.ride(ride_id).await? {
                if r.driver_is(driver_user_id) {
                    return Ok(());
                }
            }
            self.counters.races_lost.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self
                .store
                .update_request_status(request_id, OfferStatus::Accepted, OfferStatus::Pending, None)
                .await
            {
                warn!(request_id = %request_id, error = %e, "rollback after lost race failed");
            }
            return Err(DispatchError::conflict(
                "ride already accepted by another driver",
            ));
        }

        self.finalize_win(ride_id, request_id, driver_user_id, now)
            .await;
        Ok(())
    }

    /// Commit a matcher assignment. There is no prior offer; the accepted
    /// `RideRequest` row is created here as the record of the assignment.
    pub async fn commit_assignment(
        &self,
        ride_id: &Uuid,
        driver_user_id: &Uuid,
    ) -> DispatchResult<()> {
        let now = now_ms();
        let won = self.store.try_accept(ride_id, driver_user_id, now).await?;

        if !won {
            self.counters.races_lost.fetch_add(1, Ordering::Relaxed);
            return Err(DispatchError::conflict(
                "ride already accepted by another driver",
            ));
        }

        let request = RideRequest {
            request_id: Uuid::new_v4(),
            ride_id: *ride_id,
            driver_id: *driver_user_id,
            status: OfferStatus::Accepted,
            sent_at_ms: now,
            expires_at_ms: now + self.cfg.offer_ttl_ms,
            responded_at_ms: Some(now),
        };
        self.store.repo.create_request(&request).await?;

        self.finalize_win(ride_id, &request.request_id, driver_user_id, now)
            .await;
        Ok(())
    }

    /// Post-promotion bookkeeping, shared by both commit paths. Everything
    /// here is best-effort: the promotion has already happened and must not
    /// be undone by notification failures.
    async fn finalize_win(
        &self,
        ride_id: &Uuid,
        winner_request_id: &Uuid,
        driver_user_id: &Uuid,
        now: u64,
    ) {
        self.counters.rides_accepted.fetch_add(1, Ordering::Relaxed);
        crate::logger::annotate_driver(driver_user_id);

        match self
            .store
            .repo
            .cancel_sibling_requests(ride_id, winner_request_id, now)
            .await
        {
            Ok(n) if n > 0 => debug!(ride_id = %ride_id, cancelled = n, "sibling offers cancelled"),
            Ok(_) => {}
            Err(e) => warn!(ride_id = %ride_id, error = %e, "sibling cancellation failed"),
        }

        self.store.mark_driver_busy(driver_user_id, ride_id, now);
        if let Err(e) = self
            .drivers
            .update_status(*driver_user_id, DriverStatus::Busy)
            .await
        {
            warn!(driver_id = %driver_user_id, error = %e, "driver busy update failed");
        }

        self.notify_rider_accepted(ride_id, driver_user_id).await;

        info!(ride_id = %ride_id, driver_id = %driver_user_id, "ride accepted");
    }

    async fn notify_rider_accepted(&self, ride_id: &Uuid, driver_user_id: &Uuid) {
        let Ok(Some(ride)) = self.store.ride(ride_id).await else {
            return;
        };

        let (driver_name, vehicle_plate) =
            match self.drivers.find_by_user_id(*driver_user_id).await {
                Ok(Some(p)) => (p.full_name, p.vehicle_plate),
                _ => (String::new(), String::new()),
            };

        let location = self
            .tracking
            .driver_location(*driver_user_id)
            .await
            .ok()
            .flatten();
        let pickup_eta_secs = location
            .as_ref()
            .map(|loc| {
                let d = geo::haversine_km(ride.pickup.lat, ride.pickup.lon, loc.lat, loc.lon);
                geo::eta_secs(d, self.cfg.average_speed_kmh)
            })
            .unwrap_or(0);

        let payload = RideAcceptedPayload {
            ride_id: *ride_id,
            driver_name,
            vehicle_plate,
            pickup_eta_secs,
            sent_at: chrono::Utc::now(),
        };
        if let Err(e) = self.notifier.send_ride_accepted(ride.rider_id, payload).await {
            warn!(ride_id = %ride_id, error = %e, "acceptance notification failed");
        }

        // First live position so the rider's map has something to draw
        // before the tracking stream takes over.
        if let Some(loc) = location {
            let heading = RideLocationPayload {
                ride_id: *ride_id,
                lat: loc.lat,
                lon: loc.lon,
                bearing_deg: geo::initial_bearing_deg(
                    loc.lat,
                    loc.lon,
                    ride.pickup.lat,
                    ride.pickup.lon,
                ),
                sent_at: chrono::Utc::now(),
            };
            if let Err(e) = self
                .notifier
                .send_location_update(ride.rider_id, heading)
                .await
            {
                warn!(ride_id = %ride_id, error = %e, "location notification failed");
            }
        }
    }
}

/// One offer's poll loop. Terminates on: the parent ride leaving
/// `searching`, a driver response, or the offer TTL passing.
async fn poll_offer(
    store: Arc<RideStore>,
    ride_id: Uuid,
    request_id: Uuid,
    driver_id: Uuid,
    poll_ms: u64,
    winner_tx: mpsc::Sender<(Uuid, Uuid)>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(poll_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let now = now_ms();

        match store.ride(&ride_id).await {
            Ok(Some(ride)) if ride.status != RideStatus::Searching => {
                if ride.driver_is(&driver_id) {
                    // Our driver won through the accept action; surface it.
                    let _ = winner_tx.try_send((driver_id, request_id));
                } else {
                    // Someone else won; withdraw our offer.
                    let _ = store
                        .update_request_status(
                            &request_id,
                            OfferStatus::Pending,
                            OfferStatus::CancelledBySystem,
                            Some(now),
                        )
                        .await;
                }
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(e) => {
                warn!(ride_id = %ride_id, error = %e, "ride poll failed");
                continue;
            }
        }

        match store.repo.fetch_request(&request_id).await {
            Ok(Some(request)) => match request.status {
                OfferStatus::Accepted => {
                    let _ = winner_tx.try_send((driver_id, request_id));
                    return;
                }
                OfferStatus::Rejected
                | OfferStatus::Expired
                | OfferStatus::CancelledBySystem => return,
                OfferStatus::Pending => {
                    if now >= request.expires_at_ms {
                        let _ = store
                            .update_request_status(
                                &request_id,
                                OfferStatus::Pending,
                                OfferStatus::Expired,
                                None,
                            )
                            .await;
                        return;
                    }
                }
            },
            Ok(None) => return,
            Err(e) => warn!(request_id = %request_id, error = %e, "request poll failed"),
        }
    }
}
