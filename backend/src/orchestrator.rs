//! Dispatch orchestrator: the entry point for rider requests and driver
//! actions. Glues the batch collector, ranker, matcher, offer dispatcher
//! and ride state machine together, and is the only component that turns
//! component errors into user-visible responses and compensating actions.
//!
//! The batch path and the offer path run concurrently for every searching
//! ride; both converge on the atomic `searching -> accepted` promotion and
//! the loser of that conditional update stands down.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::batch::{BatchCollector, BatchExpiryHandler, BatchRequest};
use crate::config::DispatchConfig;
use crate::contracts::Collaborators;
use crate::contracts::drivers::{DriverProfile, DriverStatus};
use crate::contracts::notifier::RideStatusPayload;
use crate::contracts::tracking::TrackedDriver;
use crate::error::{DispatchError, DispatchResult};
use crate::geo;
use crate::logger::ride_span;
use crate::matching::match_batch;
use crate::metrics::Counters;
use crate::offer::OfferDispatcher;
use crate::ranking::DriverRanker;
use crate::ride::lifecycle::{
    CancelSettlement, can_transition, cancellation_settlement, payout_split, wait_surcharge,
    within_completion_radius,
};
use crate::ride::model::{
    CancelledBy, Location, OfferStatus, Ride, RideActuals, RideEstimate, RideStatus,
    RideTimestamps,
};
use crate::ride::repository::RideRole;
use crate::ride::store::RideStore;
use crate::time::now_ms;

/// A pickup or dropoff as submitted by the rider: either raw coordinates
/// or a saved-location reference to substitute.
#[derive(Clone, Debug)]
pub struct LocationInput {
    pub lat: f64,
    pub lon: f64,
    pub address: String,
    pub saved_location_id: Option<Uuid>,
}

#[derive(Clone, Debug)]
pub struct CreateRideInput {
    pub rider_id: Uuid,
    pub vehicle_class: String,
    pub pickup: LocationInput,
    pub dropoff: LocationInput,
    pub promo_code: Option<String>,
    pub scheduled_at_ms: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct CompleteRideInput {
    pub actual_distance_km: f64,
    pub actual_duration_secs: u64,
    pub driver_lat: f64,
    pub driver_lon: f64,
}

/// Ride detail enriched with the driver's live location when assigned.
#[derive(Clone, Debug)]
pub struct RideView {
    pub ride: Ride,
    pub driver_location: Option<TrackedDriver>,
}

#[derive(Clone, Debug)]
pub struct AvailableCar {
    pub profile: DriverProfile,
    pub location: TrackedDriver,
    pub distance_km: f64,
    pub eta_secs: u64,
}

/// Cheap to clone; clones share every underlying component.
#[derive(Clone)]
pub struct DispatchOrchestrator {
    store: Arc<RideStore>,
    collector: Arc<BatchCollector>,
    ranker: DriverRanker,
    dispatcher: Arc<OfferDispatcher>,
    ext: Collaborators,
    counters: Counters,
    cfg: DispatchConfig,
}

impl DispatchOrchestrator {
    pub fn new(
        store: Arc<RideStore>,
        collector: Arc<BatchCollector>,
        dispatcher: Arc<OfferDispatcher>,
        ext: Collaborators,
        counters: Counters,
        cfg: DispatchConfig,
    ) -> Self {
        let ranker = DriverRanker::new(
            ext.drivers.clone(),
            ext.tracking.clone(),
            ext.ratings.clone(),
            cfg.average_speed_kmh,
        );
        Self {
            store,
            collector,
            ranker,
            dispatcher,
            ext,
            counters,
            cfg,
        }
    }

    /// Wire the batch-expiry callback back into the orchestrator. Explicit
    /// registration step after construction; never done in `new` so there
    /// is no mutual-construction knot.
    pub fn register_batch_callback(&self) {
        self.collector.set_expiry_callback(Arc::new(self.clone()));
    }

    // =========================
    // Rider entry point
    // =========================

    #[instrument(skip(self, input), target = "orchestrator", fields(rider_id = %input.rider_id))]
    pub async fn create_ride(&self, input: CreateRideInput) -> DispatchResult<Ride> {
        let now = now_ms();

        let pickup = self.resolve_location(&input.rider_id, &input.pickup).await?;
        let dropoff = self.resolve_location(&input.rider_id, &input.dropoff).await?;
        self.validate_create(&input, &pickup, &dropoff, now).await?;

        // Straight-line estimates; pricing owns the money numbers.
        let distance_km = geo::haversine_km(pickup.lat, pickup.lon, dropoff.lat, dropoff.lon);
        let duration_secs = geo::eta_secs(distance_km, self.cfg.average_speed_kmh);

        let base_fare = self
            .ext
            .pricing
            .fare_estimate(&input.vehicle_class, distance_km, duration_secs)
            .await?;

        // Surge degrades to 1.0 on pricing trouble; a fare estimate we can
        // live without surge, not without a base.
        let surge_multiplier = match self
            .ext
            .pricing
            .combined_surge(pickup.lat, pickup.lon, now)
            .await
        {
            Ok(s) if s.is_finite() && s >= 1.0 => s,
            Ok(_) => 1.0,
            Err(e) => {
                warn!(error = %e, "surge unavailable; proceeding without");
                1.0
            }
        };

        let surged = base_fare * surge_multiplier;

        let discount = match &input.promo_code {
            Some(code) => match self
                .ext
                .promotions
                .apply_code(input.rider_id, code, surged)
                .await
            {
                Ok(applied) => applied.discount,
                Err(e) => {
                    warn!(error = %e, "promo application failed; proceeding without discount");
                    0.0
                }
            },
            None => 0.0,
        };

        // Credits can cover the whole fare; the hold amount never goes
        // negative and a zero hold is simply not created.
        let fare = (surged - discount).max(0.0);

        let scheduled = input.scheduled_at_ms.is_some();
        let ride_id = Uuid::new_v4();

        let mut wallet_hold_id = None;
        if !scheduled && fare > 0.0 {
            wallet_hold_id = Some(
                self.ext
                    .wallet
                    .hold_funds(
                        input.rider_id,
                        fare,
                        &ride_id.to_string(),
                        self.cfg.hold_ttl_secs,
                    )
                    .await?,
            );
        }

        let ride = Ride {
            ride_id,
            rider_id: input.rider_id,
            driver_id: None,
            vehicle_class: input.vehicle_class.clone(),
            status: if scheduled {
                RideStatus::Scheduled
            } else {
                RideStatus::Searching
            },
            pickup,
            dropoff,
            estimate: RideEstimate {
                distance_km,
                duration_secs,
                fare,
                surge_multiplier,
            },
            actuals: RideActuals::default(),
            wallet_hold_id,
            rider_pin: generate_pin(),
            timestamps: RideTimestamps {
                requested_at_ms: now,
                scheduled_at_ms: input.scheduled_at_ms,
                ..Default::default()
            },
            cancellation: None,
        };

        if let Err(e) = self.store.repo.create_ride(&ride).await {
            // Never leave a hold dangling behind a ride that was never born.
            if let Some(hold) = wallet_hold_id {
                if let Err(re) = self.ext.wallet.release_hold(hold).await {
                    error!(hold_id = %hold, error = %re, "hold release after failed persist also failed");
                }
            }
            return Err(DispatchError::Dependency(e));
        }

        self.counters.rides_created.fetch_add(1, Ordering::Relaxed);

        if scheduled {
            self.publish_status(ride.rider_id, &ride, "scheduled", "driver search will begin at the scheduled time")
                .await;
            self.spawn_scheduled_activation(&ride);
        } else {
            self.publish_status(
                ride.rider_id,
                &ride,
                "searching",
                &format!("looking for a driver; your pickup PIN is {}", ride.rider_pin),
            )
            .await;
            self.start_dispatch(&ride);
        }

        info!(ride_id = %ride.ride_id, scheduled, fare, "ride created");
        Ok(ride)
    }

    /// Launch both dispatch paths for a searching ride.
    fn start_dispatch(&self, ride: &Ride) {
        let batch_id = self.collector.add_request(BatchRequest {
            ride_id: ride.ride_id,
            rider_id: ride.rider_id,
            vehicle_class: ride.vehicle_class.clone(),
            pickup_lat: ride.pickup.lat,
            pickup_lon: ride.pickup.lon,
            dropoff_lat: ride.dropoff.lat,
            dropoff_lon: ride.dropoff.lon,
            trip_distance_km: ride.estimate.distance_km,
            fare_estimate: ride.estimate.fare,
        });
        debug!(ride_id = %ride.ride_id, batch_id = %batch_id, "enqueued into batch");

        let orch = self.clone();
        let ride_id = ride.ride_id;
        let span = ride_span("offer_dispatch", &ride_id);
        tokio::spawn(
            async move {
                match orch.dispatcher.dispatch(ride_id).await {
                    Ok(driver) => {
                        debug!(ride_id = %ride_id, driver_id = %driver, "offer path won")
                    }
                    Err(DispatchError::Conflict(_)) => {
                        debug!(ride_id = %ride_id, "offer path stood down; ride assigned elsewhere")
                    }
                    Err(DispatchError::NoCapacity(reason)) => {
                        orch.handle_no_capacity(ride_id, &reason).await;
                    }
                    Err(e) => warn!(ride_id = %ride_id, error = %e, "offer dispatch failed"),
                }
            }
            .instrument(span),
        );
    }

    /// Both paths failed to find a driver: cancel the ride, free the money,
    /// tell the rider.
    async fn handle_no_capacity(&self, ride_id: Uuid, reason: &str) {
        let now = now_ms();
        let cancelled = match self
            .store
            .cancel_ride(&ride_id, RideStatus::Searching, CancelledBy::System, reason, now)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                error!(ride_id = %ride_id, error = %e, "no-capacity cancellation failed");
                return;
            }
        };
        if !cancelled {
            // The batch path (or a late acceptance) got there after all.
            debug!(ride_id = %ride_id, "no-capacity stand-down; ride left searching meanwhile");
            return;
        }

        self.counters.rides_cancelled.fetch_add(1, Ordering::Relaxed);

        if let Ok(Some(ride)) = self.store.ride(&ride_id).await {
            self.release_hold_if_any(&ride).await;
            self.publish_status(ride.rider_id, &ride, "cancelled", reason).await;
        }
        info!(ride_id = %ride_id, reason, "ride cancelled for lack of capacity");
    }

    // =========================
    // Scheduled rides
    // =========================

    fn spawn_scheduled_activation(&self, ride: &Ride) {
        let Some(at_ms) = ride.timestamps.scheduled_at_ms else {
            return;
        };
        let delay = at_ms.saturating_sub(now_ms());
        let orch = self.clone();
        let ride_id = ride.ride_id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if let Err(e) = orch.activate_scheduled(ride_id).await {
                warn!(ride_id = %ride_id, error = %e, "scheduled activation failed");
            }
        });
    }

    /// Move a scheduled ride into `searching`: acquire the deferred hold,
    /// then dispatch as normal. Also driven by the catch-up sweep, so it
    /// tolerates being called for rides that already moved on.
    pub async fn activate_scheduled(&self, ride_id: Uuid) -> DispatchResult<()> {
        let ride = self
            .store
            .ride(&ride_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ride"))?;

        if ride.status != RideStatus::Scheduled {
            return Ok(());
        }

        let mut hold_id = None;
        if ride.estimate.fare > 0.0 {
            match self
                .ext
                .wallet
                .hold_funds(
                    ride.rider_id,
                    ride.estimate.fare,
                    &ride.ride_id.to_string(),
                    self.cfg.hold_ttl_secs,
                )
                .await
            {
                Ok(h) => hold_id = Some(h),
                Err(e) => {
                    warn!(ride_id = %ride_id, error = %e, "deferred hold failed; cancelling scheduled ride");
                    let now = now_ms();
                    if self
                        .store
                        .cancel_ride(
                            &ride_id,
                            RideStatus::Scheduled,
                            CancelledBy::System,
                            "payment hold failed",
                            now,
                        )
                        .await?
                    {
                        self.publish_status(ride.rider_id, &ride, "cancelled", "payment hold failed")
                            .await;
                    }
                    return Err(DispatchError::Dependency(e));
                }
            }
        }

        let activated = self
            .store
            .transition_status(&ride_id, RideStatus::Scheduled, RideStatus::Searching, now_ms())
            .await?;
        if !activated {
            // Cancelled (or otherwise moved) while we were acquiring the
            // hold; put the money back.
            if let Some(h) = hold_id {
                if let Err(e) = self.ext.wallet.release_hold(h).await {
                    error!(hold_id = %h, error = %e, "hold release after activation race failed");
                }
            }
            return Ok(());
        }

        if hold_id.is_some() {
            self.store.repo.set_wallet_hold(&ride_id, hold_id).await?;
        }

        let ride = self
            .store
            .ride(&ride_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ride"))?;
        self.publish_status(
            ride.rider_id,
            &ride,
            "searching",
            &format!("looking for a driver; your pickup PIN is {}", ride.rider_pin),
        )
        .await;
        self.start_dispatch(&ride);
        info!(ride_id = %ride_id, "scheduled ride activated");
        Ok(())
    }

    // =========================
    // Driver actions
    // =========================

    /// Driver accepts an outstanding offer. The full commit path runs here
    /// synchronously, so the loser of a race gets its `Conflict` in the
    /// response, not a second later.
    #[instrument(skip(self), target = "orchestrator", fields(ride_id = %ride_id, driver_id = %driver_user_id))]
    pub async fn accept_ride(&self, ride_id: Uuid, driver_user_id: Uuid) -> DispatchResult<Ride> {
        self.require_driver_profile(&driver_user_id).await?;

        let request = self
            .store
            .open_request(&ride_id, &driver_user_id)
            .await?
            .ok_or_else(|| DispatchError::conflict("no active offer for this driver"))?;

        let now = now_ms();
        if now >= request.expires_at_ms {
            let _ = self
                .store
                .update_request_status(
                    &request.request_id,
                    OfferStatus::Pending,
                    OfferStatus::Expired,
                    None,
                )
                .await;
            return Err(DispatchError::conflict("offer expired"));
        }

        let flipped = self
            .store
            .update_request_status(
                &request.request_id,
                OfferStatus::Pending,
                OfferStatus::Accepted,
                Some(now),
            )
            .await?;
        if !flipped {
            return Err(DispatchError::conflict("offer no longer available"));
        }

        self.dispatcher
            .commit_acceptance(&ride_id, &request.request_id, &driver_user_id)
            .await?;

        self.store
            .ride(&ride_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ride"))
    }

    pub async fn reject_ride(&self, ride_id: Uuid, driver_user_id: Uuid) -> DispatchResult<()> {
        let request = self
            .store
            .open_request(&ride_id, &driver_user_id)
            .await?
            .ok_or_else(|| DispatchError::conflict("no active offer for this driver"))?;

        let flipped = self
            .store
            .update_request_status(
                &request.request_id,
                OfferStatus::Pending,
                OfferStatus::Rejected,
                Some(now_ms()),
            )
            .await?;
        if !flipped {
            return Err(DispatchError::conflict("offer no longer available"));
        }
        Ok(())
    }

    pub async fn driver_arrived(&self, ride_id: Uuid, driver_user_id: Uuid) -> DispatchResult<Ride> {
        let ride = self.require_assigned(&ride_id, &driver_user_id).await?;

        if !can_transition(ride.status, RideStatus::Arrived) {
            return Err(DispatchError::conflict(format!(
                "cannot arrive from {}",
                ride.status.as_str()
            )));
        }

        let moved = self
            .store
            .transition_status(&ride_id, ride.status, RideStatus::Arrived, now_ms())
            .await?;
        if !moved {
            return Err(DispatchError::conflict("ride state changed; arrival not recorded"));
        }

        let ride = self.reload(&ride_id).await?;
        self.publish_status(ride.rider_id, &ride, "arrived", "your driver is at the pickup point")
            .await;
        Ok(ride)
    }

    /// Start the trip. Requires the rider's PIN; the wait-time surcharge is
    /// derived later from the arrived/started timestamps this records.
    pub async fn start_ride(
        &self,
        ride_id: Uuid,
        driver_user_id: Uuid,
        rider_pin: &str,
    ) -> DispatchResult<Ride> {
        let ride = self.require_assigned(&ride_id, &driver_user_id).await?;

        if !can_transition(ride.status, RideStatus::Started) {
            return Err(DispatchError::conflict(format!(
                "cannot start from {}",
                ride.status.as_str()
            )));
        }
        if ride.rider_pin != rider_pin {
            return Err(DispatchError::forbidden("incorrect pickup PIN"));
        }

        let moved = self
            .store
            .transition_status(&ride_id, ride.status, RideStatus::Started, now_ms())
            .await?;
        if !moved {
            return Err(DispatchError::conflict("ride state changed; start not recorded"));
        }

        let ride = self.reload(&ride_id).await?;
        self.publish_status(ride.rider_id, &ride, "started", "trip started").await;
        Ok(ride)
    }

    /// Complete the trip: dropoff-radius gate, actual fare via Pricing plus
    /// any wait-time surcharge, hold capture, driver payout, stats, and
    /// notifications.
    #[instrument(skip(self, input), target = "orchestrator", fields(ride_id = %ride_id))]
    pub async fn complete_ride(
        &self,
        ride_id: Uuid,
        driver_user_id: Uuid,
        input: CompleteRideInput,
    ) -> DispatchResult<Ride> {
        let ride = self.require_assigned(&ride_id, &driver_user_id).await?;

        if ride.status != RideStatus::Started {
            return Err(DispatchError::conflict(format!(
                "cannot complete from {}",
                ride.status.as_str()
            )));
        }
        if !within_completion_radius(
            input.driver_lat,
            input.driver_lon,
            ride.dropoff.lat,
            ride.dropoff.lon,
            &self.cfg,
        ) {
            return Err(DispatchError::validation(
                "driver is not at the dropoff location",
            ));
        }

        let base_actual = self
            .ext
            .pricing
            .actual_fare(
                &ride.vehicle_class,
                input.actual_distance_km,
                input.actual_duration_secs,
                ride.estimate.surge_multiplier,
            )
            .await?;

        let surcharge = match (ride.timestamps.arrived_at_ms, ride.timestamps.started_at_ms) {
            (Some(arrived), Some(started)) => wait_surcharge(
                arrived,
                started,
                self.cfg.wait_grace_secs,
                self.cfg.wait_fee_per_minute,
            ),
            _ => 0.0,
        };

        let fare = base_actual + surcharge;
        let (driver_payout, rider_payable) = payout_split(fare, self.cfg.driver_payout_share);

        let actuals = RideActuals {
            distance_km: Some(input.actual_distance_km),
            duration_secs: Some(input.actual_duration_secs),
            fare: Some(fare),
            driver_payout: Some(driver_payout),
            rider_payable: Some(rider_payable),
        };

        let completed = self.store.complete_ride(&ride_id, &actuals, now_ms()).await?;
        if !completed {
            return Err(DispatchError::conflict("ride state changed; completion not recorded"));
        }
        self.counters.rides_completed.fetch_add(1, Ordering::Relaxed);

        // Money and stats. The transition is committed; failures here are
        // logged and left to the sweepers rather than unwound.
        if let Some(hold) = ride.wallet_hold_id {
            match self.ext.wallet.capture_hold(hold, rider_payable).await {
                Ok(()) => {
                    if let Err(e) = self.store.repo.set_wallet_hold(&ride_id, None).await {
                        warn!(ride_id = %ride_id, error = %e, "clearing hold reference failed");
                    }
                }
                Err(e) => {
                    error!(ride_id = %ride_id, hold_id = %hold, error = %e, "fare capture failed; hold left for the sweeper");
                }
            }
        }
        if let Err(e) = self
            .ext
            .wallet
            .credit_wallet(
                driver_user_id,
                driver_payout,
                "ride fare payout",
                &ride_id.to_string(),
            )
            .await
        {
            error!(ride_id = %ride_id, error = %e, "driver payout failed");
        }
        if let Err(e) = self.ext.drivers.increment_trips(driver_user_id).await {
            warn!(error = %e, "trip counter update failed");
        }
        if let Err(e) = self
            .ext
            .drivers
            .update_earnings(driver_user_id, driver_payout)
            .await
        {
            warn!(error = %e, "earnings update failed");
        }
        if let Err(e) = self
            .ext
            .drivers
            .update_status(driver_user_id, DriverStatus::Online)
            .await
        {
            warn!(error = %e, "driver online update failed");
        }
        self.store.clear_driver_markers(&driver_user_id, &ride_id);

        let ride = self.reload(&ride_id).await?;
        self.publish_status(ride.rider_id, &ride, "completed", "trip completed").await;
        self.publish_status(driver_user_id, &ride, "completed", "trip completed").await;
        self.publish_status(ride.rider_id, &ride, "rating_prompt", "rate your trip").await;

        // Post-ride analysis runs detached; its outcome never blocks the
        // driver's response.
        let orch = self.clone();
        let analyzed = ride.clone();
        tokio::spawn(async move {
            orch.post_ride_analysis(&analyzed).await;
        });

        info!(ride_id = %ride_id, fare, surcharge, "ride completed");
        Ok(ride)
    }

    async fn post_ride_analysis(&self, ride: &Ride) {
        let reported = ride.actuals.distance_km.unwrap_or(0.0);
        let estimated = ride.estimate.distance_km;
        // Flag grossly divergent distance reports for offline review.
        let suspicious = estimated > 0.5 && reported > estimated * 2.5;
        info!(
            target: "post_ride_analysis",
            ride_id = %ride.ride_id,
            estimated_km = estimated,
            reported_km = reported,
            suspicious,
            "post-ride analysis"
        );
    }

    // =========================
    // Cancellation
    // =========================

    /// Cancel by either party, applying the fee schedule for the state the
    /// ride was observed in. The conditional update makes the fee
    /// exactly-once: a second cancel attempt cannot re-charge.
    #[instrument(skip(self), target = "orchestrator", fields(ride_id = %ride_id, actor = %actor_user_id))]
    pub async fn cancel_ride(
        &self,
        ride_id: Uuid,
        actor_user_id: Uuid,
        reason: Option<String>,
    ) -> DispatchResult<Ride> {
        let ride = self
            .store
            .ride(&ride_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ride"))?;

        let by = if ride.rider_id == actor_user_id {
            CancelledBy::Rider
        } else if ride.driver_is(&actor_user_id) {
            CancelledBy::Driver
        } else {
            return Err(DispatchError::forbidden("not a party to this ride"));
        };

        if ride.is_terminal() {
            return Err(DispatchError::validation("ride is already finished"));
        }

        let reason = reason.unwrap_or_else(|| format!("cancelled by {}", by.as_str()));
        let now = now_ms();

        let cancelled = self
            .store
            .cancel_ride(&ride_id, ride.status, by, &reason, now)
            .await?;
        if !cancelled {
            return Err(DispatchError::conflict("ride state changed; cancel and retry"));
        }
        self.counters.rides_cancelled.fetch_add(1, Ordering::Relaxed);

        self.settle_cancellation(&ride, by).await;

        // Withdraw any offers still in flight for this ride.
        if let Err(e) = self
            .store
            .repo
            .cancel_sibling_requests(&ride_id, &Uuid::nil(), now)
            .await
        {
            warn!(ride_id = %ride_id, error = %e, "offer withdrawal after cancel failed");
        }

        if let Some(driver) = ride.driver_id {
            if let Err(e) = self.ext.drivers.update_status(driver, DriverStatus::Online).await {
                warn!(driver_id = %driver, error = %e, "driver online update failed");
            }
            self.store.clear_driver_markers(&driver, &ride_id);
        }

        let updated = self.reload(&ride_id).await?;
        self.publish_status(updated.rider_id, &updated, "cancelled", &reason).await;
        if let Some(driver) = updated.driver_id {
            self.publish_status(driver, &updated, "cancelled", &reason).await;
        }

        info!(ride_id = %ride_id, by = by.as_str(), from = ride.status.as_str(), "ride cancelled");
        Ok(updated)
    }

    /// Fee schedule execution. `ride` is the pre-cancellation snapshot whose
    /// status decided the settlement.
    async fn settle_cancellation(&self, ride: &Ride, by: CancelledBy) {
        let settlement = cancellation_settlement(ride.status, by, &self.cfg);
        let reference = ride.ride_id.to_string();

        match settlement {
            CancelSettlement::ReleaseOnly => {
                self.release_hold_if_any(ride).await;
            }
            CancelSettlement::RiderFee { capture } => {
                if let Some(hold) = ride.wallet_hold_id {
                    // Capturing the fee releases the remainder of the hold.
                    if let Err(e) = self.ext.wallet.capture_hold(hold, capture).await {
                        error!(hold_id = %hold, error = %e, "cancellation fee capture failed");
                    } else if let Err(e) = self.store.repo.set_wallet_hold(&ride.ride_id, None).await
                    {
                        warn!(error = %e, "clearing hold reference failed");
                    }
                }
                if let Some(driver) = ride.driver_id {
                    if let Err(e) = self
                        .ext
                        .wallet
                        .credit_wallet(driver, capture, "rider cancellation fee", &reference)
                        .await
                    {
                        error!(driver_id = %driver, error = %e, "cancellation fee credit failed");
                    }
                }
            }
            CancelSettlement::DriverPenalty {
                penalty,
                rider_compensation,
            } => {
                self.release_hold_if_any(ride).await;
                if let Some(driver) = ride.driver_id {
                    if let Err(e) = self
                        .ext
                        .wallet
                        .deduct_penalty(driver, penalty, "driver cancellation penalty", &reference)
                        .await
                    {
                        error!(driver_id = %driver, error = %e, "driver penalty failed");
                    }
                }
                if rider_compensation > 0.0 {
                    if let Err(e) = self
                        .ext
                        .wallet
                        .credit_wallet(
                            ride.rider_id,
                            rider_compensation,
                            "cancellation compensation",
                            &reference,
                        )
                        .await
                    {
                        error!(error = %e, "rider compensation failed");
                    }
                }
            }
        }
    }

    async fn release_hold_if_any(&self, ride: &Ride) {
        let Some(hold) = ride.wallet_hold_id else {
            return;
        };
        match self.ext.wallet.release_hold(hold).await {
            Ok(()) => {
                if let Err(e) = self.store.repo.set_wallet_hold(&ride.ride_id, None).await {
                    warn!(ride_id = %ride.ride_id, error = %e, "clearing hold reference failed");
                }
            }
            Err(e) => {
                error!(hold_id = %hold, error = %e, "hold release failed; left for the sweeper")
            }
        }
    }

    // =========================
    // Reads
    // =========================

    pub async fn get_ride(&self, ride_id: Uuid, requester: Uuid) -> DispatchResult<RideView> {
        let ride = self
            .store
            .ride(&ride_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ride"))?;

        if !ride.involves(&requester) {
            return Err(DispatchError::forbidden("not a party to this ride"));
        }

        let driver_location = match ride.driver_id {
            Some(driver) if !ride.is_terminal() => {
                self.ext.tracking.driver_location(driver).await.unwrap_or_else(|e| {
                    warn!(error = %e, "live location unavailable");
                    None
                })
            }
            _ => None,
        };

        Ok(RideView {
            ride,
            driver_location,
        })
    }

    pub async fn list_rides(
        &self,
        user_id: Uuid,
        role: RideRole,
        status: Option<RideStatus>,
        page: usize,
        limit: usize,
    ) -> DispatchResult<Vec<Ride>> {
        let limit = limit.clamp(1, 100);
        let offset = page.saturating_sub(1) * limit;
        Ok(self
            .store
            .repo
            .list_rides(&user_id, role, status, limit, offset)
            .await?)
    }

    /// Discovery read: available drivers near a point, with profiles.
    pub async fn available_cars(
        &self,
        lat: f64,
        lon: f64,
        vehicle_class: Option<&str>,
    ) -> DispatchResult<Vec<AvailableCar>> {
        if !coordinates_in_range(lat, lon) {
            return Err(DispatchError::validation("coordinates out of range"));
        }
        let classes: Vec<String> = match vehicle_class {
            Some(c) => {
                if !self.cfg.knows_vehicle_class(c) {
                    return Err(DispatchError::validation(format!(
                        "unknown vehicle class: {c}"
                    )));
                }
                vec![c.to_string()]
            }
            None => self.cfg.vehicle_classes.clone(),
        };

        let mut out = Vec::new();
        for class in classes {
            let nearby = self
                .ext
                .tracking
                .find_nearby_drivers(lat, lon, 8.0, &class, true, self.cfg.candidate_limit)
                .await?;
            for location in nearby {
                if let Ok(Some(profile)) = self.ext.drivers.find_by_user_id(location.driver_id).await
                {
                    let distance_km = geo::haversine_km(lat, lon, location.lat, location.lon);
                    out.push(AvailableCar {
                        profile,
                        location,
                        distance_km,
                        eta_secs: geo::eta_secs(distance_km, self.cfg.average_speed_kmh),
                    });
                }
            }
        }
        out.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(out)
    }

    // =========================
    // Internals
    // =========================

    async fn resolve_location(
        &self,
        rider_id: &Uuid,
        input: &LocationInput,
    ) -> DispatchResult<Location> {
        match input.saved_location_id {
            Some(id) => {
                let saved = self
                    .ext
                    .saved_locations
                    .resolve(*rider_id, id)
                    .await?
                    .ok_or_else(|| DispatchError::not_found("saved location"))?;
                Ok(Location {
                    lat: saved.lat,
                    lon: saved.lon,
                    address: saved.address,
                })
            }
            None => Ok(Location {
                lat: input.lat,
                lon: input.lon,
                address: input.address.clone(),
            }),
        }
    }

    async fn validate_create(
        &self,
        input: &CreateRideInput,
        pickup: &Location,
        dropoff: &Location,
        now: u64,
    ) -> DispatchResult<()> {
        if !coordinates_in_range(pickup.lat, pickup.lon)
            || !coordinates_in_range(dropoff.lat, dropoff.lon)
        {
            return Err(DispatchError::validation("coordinates out of range"));
        }
        if geo::haversine_m(pickup.lat, pickup.lon, dropoff.lat, dropoff.lon) < 10.0 {
            return Err(DispatchError::validation(
                "pickup and dropoff are the same location",
            ));
        }
        if !self.cfg.knows_vehicle_class(&input.vehicle_class) {
            return Err(DispatchError::validation(format!(
                "unknown vehicle class: {}",
                input.vehicle_class
            )));
        }
        if let Some(at) = input.scheduled_at_ms {
            if at <= now {
                return Err(DispatchError::validation("scheduled time is in the past"));
            }
        }
        if let Some(code) = &input.promo_code {
            if code.trim().is_empty() {
                return Err(DispatchError::validation("malformed promo code"));
            }
            let valid = self
                .ext
                .promotions
                .validate_code(input.rider_id, code)
                .await?;
            if !valid {
                return Err(DispatchError::validation("invalid promo code"));
            }
        }
        Ok(())
    }

    async fn require_driver_profile(&self, driver_user_id: &Uuid) -> DispatchResult<DriverProfile> {
        self.ext
            .drivers
            .find_by_user_id(*driver_user_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("driver"))
    }

    /// Fetch a ride and assert the actor is its assigned driver.
    async fn require_assigned(
        &self,
        ride_id: &Uuid,
        driver_user_id: &Uuid,
    ) -> DispatchResult<Ride> {
        let ride = self
            .store
            .ride(ride_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ride"))?;
        if !ride.driver_is(driver_user_id) {
            return Err(DispatchError::forbidden("not the assigned driver"));
        }
        Ok(ride)
    }

    async fn reload(&self, ride_id: &Uuid) -> DispatchResult<Ride> {
        self.store
            .ride(ride_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ride"))
    }

    async fn publish_status(&self, user_id: Uuid, ride: &Ride, status: &str, detail: &str) {
        let payload = RideStatusPayload {
            ride_id: ride.ride_id,
            status: status.to_string(),
            detail: detail.to_string(),
            sent_at: chrono::Utc::now(),
        };
        if let Err(e) = self.ext.notifier.send_status_update(user_id, payload).await {
            warn!(ride_id = %ride.ride_id, status, error = %e, "status notification failed");
        }
    }
}

/// Batch-expiry re-entry: rank candidates around the batch, match, and
/// commit each assignment through the atomic promotion. Runs on a dedicated
/// task with its own error boundary; the collector is already lock-free at
/// this point.
#[async_trait::async_trait]
impl BatchExpiryHandler for DispatchOrchestrator {
    async fn on_batch_ready(&self, batch_id: Uuid, requests: Vec<BatchRequest>) {
        if requests.is_empty() {
            return;
        }

        let vehicle_class = requests[0].vehicle_class.clone();
        let centroid_lat =
            requests.iter().map(|r| r.pickup_lat).sum::<f64>() / requests.len() as f64;
        let centroid_lon =
            requests.iter().map(|r| r.pickup_lon).sum::<f64>() / requests.len() as f64;

        let candidates = match self
            .ext
            .tracking
            .find_nearby_drivers(
                centroid_lat,
                centroid_lon,
                8.0,
                &vehicle_class,
                true,
                self.cfg.candidate_limit,
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                // No candidates at this radius; the offer path keeps going.
                warn!(batch_id = %batch_id, error = %e, "batch candidate search failed");
                return;
            }
        };
        if candidates.is_empty() {
            debug!(batch_id = %batch_id, "no candidates for batch; leaving rides to the offer path");
            return;
        }

        let ids: Vec<Uuid> = candidates.iter().map(|c| c.driver_id).collect();
        let ranked = self.ranker.rank(&ids, centroid_lat, centroid_lon).await;

        let result = match_batch(batch_id, &requests, &ranked, self.cfg.acceptance_threshold);

        let mut committed = 0usize;
        for assignment in &result.assignments {
            match self
                .dispatcher
                .commit_assignment(&assignment.ride_id, &assignment.driver_id)
                .await
            {
                Ok(()) => committed += 1,
                Err(DispatchError::Conflict(_)) => {
                    // The offer path (or the driver's own accept) beat us.
                    debug!(ride_id = %assignment.ride_id, "batch assignment stood down");
                }
                Err(e) => {
                    warn!(ride_id = %assignment.ride_id, error = %e, "batch assignment failed")
                }
            }
        }

        self.counters
            .batches_matched
            .fetch_add(committed as u64, Ordering::Relaxed);
        self.counters
            .batch_unmatched
            .fetch_add(result.unmatched_ride_ids.len() as u64, Ordering::Relaxed);

        info!(
            batch_id = %batch_id,
            requests = requests.len(),
            matched = result.matched_count,
            committed,
            unmatched = result.unmatched_ride_ids.len(),
            duration_ms = result.duration_ms,
            "batch matching pass finished"
        );
    }
}

fn coordinates_in_range(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Four-digit pickup PIN.
fn generate_pin() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let n = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) % 10_000;
    format!("{n:04}")
}
