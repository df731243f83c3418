//! Shared fixtures for unit and integration tests: an in-memory
//! `RideRepository` with the same conditional-update semantics as the SQL
//! implementation, and recording/static collaborators.
//!
//! Gated behind the `test-helpers` feature (on by default) so integration
//! tests and downstream harnesses can use them without duplicating mocks.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::contracts::drivers::{DriverProfile, DriverStatus, Drivers};
use crate::contracts::notifier::{
    Notifier, RideAcceptedPayload, RideLocationPayload, RideOfferPayload, RideStatusPayload,
};
use crate::contracts::pricing::Pricing;
use crate::contracts::promotions::{AppliedPromo, PromoCode, Promotions};
use crate::contracts::ratings::{DriverRatingStats, Ratings};
use crate::contracts::saved_locations::{SavedLocation, SavedLocations};
use crate::contracts::tracking::{TrackedDriver, Tracking};
use crate::contracts::wallet::Wallet;
use crate::contracts::Collaborators;
use crate::geo;
use crate::ride::model::{
    CancelledBy, Cancellation, OfferStatus, Ride, RideActuals, RideRequest, RideStatus,
};
use crate::ride::repository::{RideRepository, RideRole};

/* =========================
In-memory ride repository
========================= */

#[derive(Default)]
pub struct InMemoryRideRepository {
    rides: Mutex<HashMap<Uuid, Ride>>,
    requests: Mutex<HashMap<Uuid, RideRequest>>,
}

impl InMemoryRideRepository {
    pub fn ride_snapshot(&self, ride_id: &Uuid) -> Option<Ride> {
        self.rides.lock().get(ride_id).cloned()
    }

    pub fn request_snapshot(&self, request_id: &Uuid) -> Option<RideRequest> {
        self.requests.lock().get(request_id).cloned()
    }

    /// Direct fixture surgery for tests that need a ride in a precise state
    /// (e.g. timestamps minutes apart) without waiting for wall time.
    pub fn with_ride_mut(&self, ride_id: &Uuid, f: impl FnOnce(&mut Ride)) {
        if let Some(r) = self.rides.lock().get_mut(ride_id) {
            f(r);
        }
    }
}

fn stamp(ride: &mut Ride, to: RideStatus, now_ms: u64) {
    match to {
        RideStatus::Accepted => ride.timestamps.accepted_at_ms = Some(now_ms),
        RideStatus::Arrived => ride.timestamps.arrived_at_ms = Some(now_ms),
        RideStatus::Started => ride.timestamps.started_at_ms = Some(now_ms),
        RideStatus::Completed => ride.timestamps.completed_at_ms = Some(now_ms),
        RideStatus::Cancelled => ride.timestamps.cancelled_at_ms = Some(now_ms),
        RideStatus::Searching | RideStatus::Scheduled => {}
    }
}

#[async_trait]
impl RideRepository for InMemoryRideRepository {
    async fn create_ride(&self, ride: &Ride) -> anyhow::Result<()> {
        self.rides.lock().insert(ride.ride_id, ride.clone());
        Ok(())
    }

    async fn fetch_ride(&self, ride_id: &Uuid) -> anyhow::Result<Option<Ride>> {
        Ok(self.rides.lock().get(ride_id).cloned())
    }

    async fn list_rides(
        &self,
        user_id: &Uuid,
        role: RideRole,
        status: Option<RideStatus>,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<Ride>> {
        let mut rides: Vec<Ride> = self
            .rides
            .lock()
            .values()
            .filter(|r| match role {
                RideRole::Rider => r.rider_id == *user_id,
                RideRole::Driver => r.driver_id.as_ref() == Some(user_id),
            })
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        rides.sort_by(|a, b| b.timestamps.requested_at_ms.cmp(&a.timestamps.requested_at_ms));
        Ok(rides.into_iter().skip(offset).take(limit).collect())
    }

    async fn try_accept(
        &self,
        ride_id: &Uuid,
        driver_user_id: &Uuid,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        let mut rides = self.rides.lock();
        match rides.get_mut(ride_id) {
            Some(r) if r.status == RideStatus::Searching => {
                r.status = RideStatus::Accepted;
                r.driver_id = Some(*driver_user_id);
                r.timestamps.accepted_at_ms = Some(now_ms);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_status(
        &self,
        ride_id: &Uuid,
        from: RideStatus,
        to: RideStatus,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        let mut rides = self.rides.lock();
        match rides.get_mut(ride_id) {
            Some(r) if r.status == from => {
                r.status = to;
                stamp(r, to, now_ms);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_ride(
        &self,
        ride_id: &Uuid,
        actuals: &RideActuals,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        let mut rides = self.rides.lock();
        match rides.get_mut(ride_id) {
            Some(r) if r.status == RideStatus::Started => {
                r.status = RideStatus::Completed;
                r.timestamps.completed_at_ms = Some(now_ms);
                r.actuals = *actuals;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_ride(
        &self,
        ride_id: &Uuid,
        from: RideStatus,
        by: CancelledBy,
        reason: &str,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        let mut rides = self.rides.lock();
        match rides.get_mut(ride_id) {
            Some(r) if r.status == from => {
                r.status = RideStatus::Cancelled;
                r.timestamps.cancelled_at_ms = Some(now_ms);
                r.cancellation = Some(Cancellation {
                    by,
                    reason: reason.to_string(),
                });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_wallet_hold(&self, ride_id: &Uuid, hold_id: Option<Uuid>) -> anyhow::Result<()> {
        if let Some(r) = self.rides.lock().get_mut(ride_id) {
            r.wallet_hold_id = hold_id;
        }
        Ok(())
    }

    async fn rides_with_stuck_holds(&self, limit: usize) -> anyhow::Result<Vec<Ride>> {
        Ok(self
            .rides
            .lock()
            .values()
            .filter(|r| r.is_terminal() && r.wallet_hold_id.is_some())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_due_scheduled(&self, now_ms: u64, limit: usize) -> anyhow::Result<Vec<Ride>> {
        Ok(self
            .rides
            .lock()
            .values()
            .filter(|r| {
                r.status == RideStatus::Scheduled
                    && r.timestamps.scheduled_at_ms.is_some_and(|t| t <= now_ms)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_request(&self, request: &RideRequest) -> anyhow::Result<()> {
        self.requests.lock().insert(request.request_id, request.clone());
        Ok(())
    }

    async fn fetch_request(&self, request_id: &Uuid) -> anyhow::Result<Option<RideRequest>> {
        Ok(self.requests.lock().get(request_id).cloned())
    }

    async fn fetch_open_request(
        &self,
        ride_id: &Uuid,
        driver_user_id: &Uuid,
    ) -> anyhow::Result<Option<RideRequest>> {
        Ok(self
            .requests
            .lock()
            .values()
            .find(|r| {
                r.ride_id == *ride_id
                    && r.driver_id == *driver_user_id
                    && r.status == OfferStatus::Pending
            })
            .cloned())
    }

    async fn requests_for_ride(&self, ride_id: &Uuid) -> anyhow::Result<Vec<RideRequest>> {
        let mut out: Vec<RideRequest> = self
            .requests
            .lock()
            .values()
            .filter(|r| r.ride_id == *ride_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.sent_at_ms.cmp(&b.sent_at_ms));
        Ok(out)
    }

    async fn update_request_status(
        &self,
        request_id: &Uuid,
        from: OfferStatus,
        to: OfferStatus,
        responded_at_ms: Option<u64>,
    ) -> anyhow::Result<bool> {
        let mut requests = self.requests.lock();
        match requests.get_mut(request_id) {
            Some(r) if r.status == from => {
                r.status = to;
                if responded_at_ms.is_some() {
                    r.responded_at_ms = responded_at_ms;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_sibling_requests(
        &self,
        ride_id: &Uuid,
        winner_request_id: &Uuid,
        now_ms: u64,
    ) -> anyhow::Result<u64> {
        let mut count = 0;
        for r in self.requests.lock().values_mut() {
            if r.ride_id == *ride_id
                && r.request_id != *winner_request_id
                && r.status == OfferStatus::Pending
            {
                r.status = OfferStatus::CancelledBySystem;
                r.responded_at_ms = Some(now_ms);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn expire_overdue_requests(&self, now_ms: u64) -> anyhow::Result<u64> {
        let mut count = 0;
        for r in self.requests.lock().values_mut() {
            if r.status == OfferStatus::Pending && r.expires_at_ms <= now_ms {
                r.status = OfferStatus::Expired;
                count += 1;
            }
        }
        Ok(count)
    }
}

/* =========================
Collaborator fixtures
========================= */

/// Deterministic pricing: `base + per_km * distance`, surge fixed.
pub struct StaticPricing {
    pub base_fare: f64,
    pub per_km: f64,
    pub surge: f64,
    pub fail_surge: AtomicBool,
}

impl Default for StaticPricing {
    fn default() -> Self {
        Self {
            base_fare: 2.0,
            per_km: 1.5,
            surge: 1.0,
            fail_surge: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Pricing for StaticPricing {
    async fn fare_estimate(
        &self,
        _vehicle_class: &str,
        distance_km: f64,
        _duration_secs: u64,
    ) -> anyhow::Result<f64> {
        Ok(self.base_fare + self.per_km * distance_km)
    }

    async fn combined_surge(&self, _lat: f64, _lon: f64, _at_ms: u64) -> anyhow::Result<f64> {
        if self.fail_surge.load(Ordering::SeqCst) {
            anyhow::bail!("surge service unavailable");
        }
        Ok(self.surge)
    }

    async fn eta_estimate(&self, distance_km: f64) -> anyhow::Result<u64> {
        Ok(geo::eta_secs(distance_km, 40.0))
    }

    async fn actual_fare(
        &self,
        _vehicle_class: &str,
        distance_km: f64,
        _duration_secs: u64,
        surge_multiplier: f64,
    ) -> anyhow::Result<f64> {
        Ok((self.base_fare + self.per_km * distance_km) * surge_multiplier)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WalletEvent {
    Held {
        hold_id: Uuid,
        user_id: Uuid,
        amount: f64,
    },
    Captured {
        hold_id: Uuid,
        amount: f64,
    },
    Released {
        hold_id: Uuid,
    },
    Credited {
        user_id: Uuid,
        amount: f64,
        reason: String,
    },
    Penalized {
        user_id: Uuid,
        amount: f64,
        reason: String,
    },
}

/// Records every money movement so tests can assert the exactly-once hold
/// protocol.
#[derive(Default)]
pub struct RecordingWallet {
    pub events: Mutex<Vec<WalletEvent>>,
    pub fail_holds: AtomicBool,
}

impl RecordingWallet {
    pub fn events(&self) -> Vec<WalletEvent> {
        self.events.lock().clone()
    }

    pub fn captures_for(&self, hold_id: &Uuid) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                WalletEvent::Captured { hold_id: h, amount } if h == *hold_id => Some(amount),
                _ => None,
            })
            .collect()
    }

    pub fn released(&self, hold_id: &Uuid) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, WalletEvent::Released { hold_id: h } if h == hold_id))
    }
}

#[async_trait]
impl Wallet for RecordingWallet {
    async fn hold_funds(
        &self,
        user_id: Uuid,
        amount: f64,
        _reference: &str,
        _ttl_secs: u64,
    ) -> anyhow::Result<Uuid> {
        if self.fail_holds.load(Ordering::SeqCst) {
            anyhow::bail!("insufficient funds");
        }
        let hold_id = Uuid::new_v4();
        self.events.lock().push(WalletEvent::Held {
            hold_id,
            user_id,
            amount,
        });
        Ok(hold_id)
    }

    async fn capture_hold(&self, hold_id: Uuid, amount: f64) -> anyhow::Result<()> {
        self.events
            .lock()
            .push(WalletEvent::Captured { hold_id, amount });
        Ok(())
    }

    async fn release_hold(&self, hold_id: Uuid) -> anyhow::Result<()> {
        self.events.lock().push(WalletEvent::Released { hold_id });
        Ok(())
    }

    async fn credit_wallet(
        &self,
        user_id: Uuid,
        amount: f64,
        reason: &str,
        _reference: &str,
    ) -> anyhow::Result<()> {
        self.events.lock().push(WalletEvent::Credited {
            user_id,
            amount,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn deduct_penalty(
        &self,
        user_id: Uuid,
        amount: f64,
        reason: &str,
        _reference: &str,
    ) -> anyhow::Result<()> {
        self.events.lock().push(WalletEvent::Penalized {
            user_id,
            amount,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

struct TrackedFixture {
    driver: TrackedDriver,
    vehicle_class: String,
    available: bool,
}

/// Fixed set of tracked drivers; `find_nearby_drivers` filters by haversine
/// distance exactly like a real geo index would.
#[derive(Default)]
pub struct StaticTracking {
    fixtures: Mutex<Vec<TrackedFixture>>,
}

impl StaticTracking {
    pub fn add_driver(
        &self,
        driver_id: Uuid,
        lat: f64,
        lon: f64,
        vehicle_class: &str,
        available: bool,
        updated_at_ms: u64,
    ) {
        self.fixtures.lock().push(TrackedFixture {
            driver: TrackedDriver {
                driver_id,
                lat,
                lon,
                updated_at_ms,
            },
            vehicle_class: vehicle_class.to_string(),
            available,
        });
    }

    pub fn set_available(&self, driver_id: &Uuid, available: bool) {
        for f in self.fixtures.lock().iter_mut() {
            if f.driver.driver_id == *driver_id {
                f.available = available;
            }
        }
    }
}

#[async_trait]
impl Tracking for StaticTracking {
    async fn find_nearby_drivers(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        vehicle_class: &str,
        only_available: bool,
        limit: usize,
    ) -> anyhow::Result<Vec<TrackedDriver>> {
        let mut hits: Vec<(f64, TrackedDriver)> = self
            .fixtures
            .lock()
            .iter()
            .filter(|f| f.vehicle_class == vehicle_class)
            .filter(|f| !only_available || f.available)
            .filter_map(|f| {
                let d = geo::haversine_km(lat, lon, f.driver.lat, f.driver.lon);
                (d <= radius_km).then(|| (d, f.driver.clone()))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(hits.into_iter().take(limit).map(|(_, d)| d).collect())
    }

    async fn driver_location(&self, driver_id: Uuid) -> anyhow::Result<Option<TrackedDriver>> {
        Ok(self
            .fixtures
            .lock()
            .iter()
            .find(|f| f.driver.driver_id == driver_id)
            .map(|f| f.driver.clone()))
    }

    async fn prune_stale(&self, cutoff_ms: u64) -> anyhow::Result<usize> {
        let mut fixtures = self.fixtures.lock();
        let before = fixtures.len();
        fixtures.retain(|f| f.driver.updated_at_ms >= cutoff_ms);
        Ok(before - fixtures.len())
    }
}

#[derive(Default)]
pub struct InMemoryDrivers {
    profiles: Mutex<HashMap<Uuid, DriverProfile>>,
    pub trips: Mutex<HashMap<Uuid, u64>>,
    pub earnings: Mutex<HashMap<Uuid, f64>>,
}

impl InMemoryDrivers {
    pub fn add(&self, profile: DriverProfile) {
        self.profiles.lock().insert(profile.user_id, profile);
    }

    pub fn add_simple(&self, user_id: Uuid, vehicle_class: &str) {
        self.add(DriverProfile {
            driver_id: Uuid::new_v4(),
            user_id,
            full_name: format!("driver-{}", &user_id.to_string()[..8]),
            vehicle_class: vehicle_class.to_string(),
            vehicle_plate: "KA-01-0001".to_string(),
            status: DriverStatus::Online,
        });
    }

    pub fn status_of(&self, user_id: &Uuid) -> Option<DriverStatus> {
        self.profiles.lock().get(user_id).map(|p| p.status)
    }
}

#[async_trait]
impl Drivers for InMemoryDrivers {
    async fn find_by_id(&self, driver_id: Uuid) -> anyhow::Result<Option<DriverProfile>> {
        Ok(self
            .profiles
            .lock()
            .values()
            .find(|p| p.driver_id == driver_id)
            .cloned())
    }

    async fn find_by_user_id(&self, user_id: Uuid) -> anyhow::Result<Option<DriverProfile>> {
        Ok(self.profiles.lock().get(&user_id).cloned())
    }

    async fn update_status(&self, user_id: Uuid, status: DriverStatus) -> anyhow::Result<()> {
        if let Some(p) = self.profiles.lock().get_mut(&user_id) {
            p.status = status;
        }
        Ok(())
    }

    async fn increment_trips(&self, user_id: Uuid) -> anyhow::Result<()> {
        *self.trips.lock().entry(user_id).or_insert(0) += 1;
        Ok(())
    }

    async fn update_earnings(&self, user_id: Uuid, amount: f64) -> anyhow::Result<()> {
        *self.earnings.lock().entry(user_id).or_insert(0.0) += amount;
        Ok(())
    }
}

#[derive(Default)]
pub struct StaticRatings {
    pub driver_stats: Mutex<HashMap<Uuid, DriverRatingStats>>,
    pub rider_ratings: Mutex<HashMap<Uuid, f64>>,
    /// Drivers whose stats fetch should fail, for degraded-path tests.
    pub failing_drivers: Mutex<Vec<Uuid>>,
}

impl StaticRatings {
    pub fn set_driver(&self, user_id: Uuid, stats: DriverRatingStats) {
        self.driver_stats.lock().insert(user_id, stats);
    }

    pub fn set_rider(&self, rider_id: Uuid, rating: f64) {
        self.rider_ratings.lock().insert(rider_id, rating);
    }
}

#[async_trait]
impl Ratings for StaticRatings {
    async fn driver_rating_stats(&self, driver_user_id: Uuid) -> anyhow::Result<DriverRatingStats> {
        if self.failing_drivers.lock().contains(&driver_user_id) {
            anyhow::bail!("ratings unavailable for {driver_user_id}");
        }
        Ok(self
            .driver_stats
            .lock()
            .get(&driver_user_id)
            .copied()
            .unwrap_or_default())
    }

    async fn rider_rating(&self, rider_id: Uuid) -> anyhow::Result<f64> {
        Ok(self.rider_ratings.lock().get(&rider_id).copied().unwrap_or(4.5))
    }
}

#[derive(Default)]
pub struct StaticPromotions {
    pub codes: Mutex<HashMap<String, PromoCode>>,
}

impl StaticPromotions {
    pub fn add_code(&self, code: &str, percent_off: f64, max_discount: f64) {
        self.codes.lock().insert(
            code.to_string(),
            PromoCode {
                code: code.to_string(),
                percent_off,
                max_discount,
            },
        );
    }
}

#[async_trait]
impl Promotions for StaticPromotions {
    async fn validate_code(&self, _rider_id: Uuid, code: &str) -> anyhow::Result<bool> {
        Ok(self.codes.lock().contains_key(code))
    }

    async fn apply_code(
        &self,
        _rider_id: Uuid,
        code: &str,
        fare: f64,
    ) -> anyhow::Result<AppliedPromo> {
        let codes = self.codes.lock();
        let promo = codes
            .get(code)
            .ok_or_else(|| anyhow::anyhow!("unknown promo code {code}"))?;
        let discount = (fare * promo.percent_off / 100.0).min(promo.max_discount);
        Ok(AppliedPromo {
            code: code.to_string(),
            discount,
        })
    }

    async fn promo_code(&self, code: &str) -> anyhow::Result<Option<PromoCode>> {
        Ok(self.codes.lock().get(code).cloned())
    }
}

#[derive(Clone, Debug)]
pub enum Notification {
    OfferSent { driver: Uuid, ride: Uuid },
    Accepted { rider: Uuid, ride: Uuid },
    Status { user: Uuid, ride: Uuid, status: String },
    Location { user: Uuid, ride: Uuid },
    Broadcast,
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }

    pub fn offers_to(&self, driver: &Uuid) -> usize {
        self.events()
            .iter()
            .filter(|n| matches!(n, Notification::OfferSent { driver: d, .. } if d == driver))
            .count()
    }

    pub fn statuses_for(&self, user: &Uuid) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Status { user: u, status, .. } if u == *user => Some(status),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_ride_request(
        &self,
        driver_user_id: Uuid,
        payload: RideOfferPayload,
    ) -> anyhow::Result<()> {
        self.events.lock().push(Notification::OfferSent {
            driver: driver_user_id,
            ride: payload.ride_id,
        });
        Ok(())
    }

    async fn send_ride_accepted(
        &self,
        rider_id: Uuid,
        payload: RideAcceptedPayload,
    ) -> anyhow::Result<()> {
        self.events.lock().push(Notification::Accepted {
            rider: rider_id,
            ride: payload.ride_id,
        });
        Ok(())
    }

    async fn send_status_update(
        &self,
        user_id: Uuid,
        payload: RideStatusPayload,
    ) -> anyhow::Result<()> {
        self.events.lock().push(Notification::Status {
            user: user_id,
            ride: payload.ride_id,
            status: payload.status,
        });
        Ok(())
    }

    async fn send_location_update(
        &self,
        user_id: Uuid,
        payload: RideLocationPayload,
    ) -> anyhow::Result<()> {
        self.events.lock().push(Notification::Location {
            user: user_id,
            ride: payload.ride_id,
        });
        Ok(())
    }

    async fn broadcast_to_all(&self, _message: serde_json::Value) -> anyhow::Result<()> {
        self.events.lock().push(Notification::Broadcast);
        Ok(())
    }
}

#[derive(Default)]
pub struct StaticSavedLocations {
    pub locations: Mutex<HashMap<(Uuid, Uuid), SavedLocation>>,
}

impl StaticSavedLocations {
    pub fn add(&self, user_id: Uuid, location: SavedLocation) {
        self.locations
            .lock()
            .insert((user_id, location.location_id), location);
    }
}

#[async_trait]
impl SavedLocations for StaticSavedLocations {
    async fn resolve(
        &self,
        user_id: Uuid,
        location_id: Uuid,
    ) -> anyhow::Result<Option<SavedLocation>> {
        Ok(self.locations.lock().get(&(user_id, location_id)).cloned())
    }
}

/// One handle per collaborator so tests can both inject and inspect.
pub struct TestCollaborators {
    pub pricing: Arc<StaticPricing>,
    pub wallet: Arc<RecordingWallet>,
    pub tracking: Arc<StaticTracking>,
    pub drivers: Arc<InMemoryDrivers>,
    pub ratings: Arc<StaticRatings>,
    pub promotions: Arc<StaticPromotions>,
    pub notifier: Arc<RecordingNotifier>,
    pub saved_locations: Arc<StaticSavedLocations>,
}

impl Default for TestCollaborators {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCollaborators {
    pub fn new() -> Self {
        Self {
            pricing: Arc::new(StaticPricing::default()),
            wallet: Arc::new(RecordingWallet::default()),
            tracking: Arc::new(StaticTracking::default()),
            drivers: Arc::new(InMemoryDrivers::default()),
            ratings: Arc::new(StaticRatings::default()),
            promotions: Arc::new(StaticPromotions::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            saved_locations: Arc::new(StaticSavedLocations::default()),
        }
    }

    pub fn as_collaborators(&self) -> Collaborators {
        Collaborators {
            pricing: self.pricing.clone(),
            wallet: self.wallet.clone(),
            tracking: self.tracking.clone(),
            drivers: self.drivers.clone(),
            ratings: self.ratings.clone(),
            promotions: self.promotions.clone(),
            notifier: self.notifier.clone(),
            saved_locations: self.saved_locations.clone(),
        }
    }

    /// Register a driver everywhere at once: profile, rating stats, and a
    /// tracked location.
    pub fn seed_driver(
        &self,
        user_id: Uuid,
        lat: f64,
        lon: f64,
        vehicle_class: &str,
        stats: DriverRatingStats,
        now_ms: u64,
    ) {
        self.drivers.add_simple(user_id, vehicle_class);
        self.ratings.set_driver(user_id, stats);
        self.tracking
            .add_driver(user_id, lat, lon, vehicle_class, true, now_ms);
    }
}
