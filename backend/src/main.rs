use std::sync::Arc;

use async_trait::async_trait;
use backend::{
    batch::BatchCollector,
    config::DispatchConfig,
    contracts::{
        Collaborators,
        drivers::{DriverProfile, DriverStatus, Drivers},
        notifier::{
            Notifier, RideAcceptedPayload, RideLocationPayload, RideOfferPayload,
            RideStatusPayload,
        },
        pricing::Pricing,
        promotions::{AppliedPromo, PromoCode, Promotions},
        ratings::{DriverRatingStats, Ratings},
        saved_locations::{SavedLocation, SavedLocations},
        tracking::{TrackedDriver, Tracking},
        wallet::Wallet,
    },
    db::Db,
    geo,
    logger::init_tracing,
    maintenance,
    metrics::Counters,
    offer::OfferDispatcher,
    orchestrator::DispatchOrchestrator,
    ride::repository_sqlx::SqlxRideRepository,
    ride::store::RideStore,
};
use uuid::Uuid;

// TODO: replace these bootstrap collaborators with the real service
// adapters (pricing service, wallet ledger, geo tracker, profile store,
// websocket hub) once their clients land.

struct FlatRatePricing;

#[async_trait]
impl Pricing for FlatRatePricing {
    async fn fare_estimate(
        &self,
        _vehicle_class: &str,
        distance_km: f64,
        _duration_secs: u64,
    ) -> anyhow::Result<f64> {
        Ok(2.0 + 1.5 * distance_km)
    }

    async fn combined_surge(&self, _lat: f64, _lon: f64, _at_ms: u64) -> anyhow::Result<f64> {
        Ok(1.0)
    }

    async fn eta_estimate(&self, distance_km: f64) -> anyhow::Result<u64> {
        Ok(geo::eta_secs(distance_km, 40.0))
    }

    async fn actual_fare(
        &self,
        vehicle_class: &str,
        distance_km: f64,
        duration_secs: u64,
        surge_multiplier: f64,
    ) -> anyhow::Result<f64> {
        Ok(self.fare_estimate(vehicle_class, distance_km, duration_secs).await? * surge_multiplier)
    }
}

struct LoggingWallet;

#[async_trait]
impl Wallet for LoggingWallet {
    async fn hold_funds(
        &self,
        user_id: Uuid,
        amount: f64,
        reference: &str,
        _ttl_secs: u64,
    ) -> anyhow::Result<Uuid> {
        let hold_id = Uuid::new_v4();
        tracing::info!(%user_id, amount, reference, %hold_id, "wallet hold");
        Ok(hold_id)
    }

    async fn capture_hold(&self, hold_id: Uuid, amount: f64) -> anyhow::Result<()> {
        tracing::info!(%hold_id, amount, "wallet capture");
        Ok(())
    }

    async fn release_hold(&self, hold_id: Uuid) -> anyhow::Result<()> {
        tracing::info!(%hold_id, "wallet release");
        Ok(())
    }

    async fn credit_wallet(
        &self,
        user_id: Uuid,
        amount: f64,
        reason: &str,
        reference: &str,
    ) -> anyhow::Result<()> {
        tracing::info!(%user_id, amount, reason, reference, "wallet credit");
        Ok(())
    }

    async fn deduct_penalty(
        &self,
        user_id: Uuid,
        amount: f64,
        reason: &str,
        reference: &str,
    ) -> anyhow::Result<()> {
        tracing::info!(%user_id, amount, reason, reference, "wallet penalty");
        Ok(())
    }
}

struct EmptyTracking;

#[async_trait]
impl Tracking for EmptyTracking {
    async fn find_nearby_drivers(
        &self,
        _lat: f64,
        _lon: f64,
        _radius_km: f64,
        _vehicle_class: &str,
        _only_available: bool,
        _limit: usize,
    ) -> anyhow::Result<Vec<TrackedDriver>> {
        Ok(Vec::new())
    }

    async fn driver_location(&self, _driver_id: Uuid) -> anyhow::Result<Option<TrackedDriver>> {
        Ok(None)
    }

    async fn prune_stale(&self, _cutoff_ms: u64) -> anyhow::Result<usize> {
        Ok(0)
    }
}

struct EmptyDrivers;

#[async_trait]
impl Drivers for EmptyDrivers {
    async fn find_by_id(&self, _driver_id: Uuid) -> anyhow::Result<Option<DriverProfile>> {
        Ok(None)
    }

    async fn find_by_user_id(&self, _user_id: Uuid) -> anyhow::Result<Option<DriverProfile>> {
        Ok(None)
    }

    async fn update_status(&self, user_id: Uuid, status: DriverStatus) -> anyhow::Result<()> {
        tracing::info!(%user_id, status = status.as_str(), "driver status");
        Ok(())
    }

    async fn increment_trips(&self, _user_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update_earnings(&self, _user_id: Uuid, _amount: f64) -> anyhow::Result<()> {
        Ok(())
    }
}

struct DefaultRatings;

#[async_trait]
impl Ratings for DefaultRatings {
    async fn driver_rating_stats(&self, _driver_user_id: Uuid) -> anyhow::Result<DriverRatingStats> {
        Ok(DriverRatingStats::default())
    }

    async fn rider_rating(&self, _rider_id: Uuid) -> anyhow::Result<f64> {
        Ok(4.5)
    }
}

struct NoPromotions;

#[async_trait]
impl Promotions for NoPromotions {
    async fn validate_code(&self, _rider_id: Uuid, _code: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn apply_code(
        &self,
        _rider_id: Uuid,
        code: &str,
        _fare: f64,
    ) -> anyhow::Result<AppliedPromo> {
        anyhow::bail!("unknown promo code {code}")
    }

    async fn promo_code(&self, _code: &str) -> anyhow::Result<Option<PromoCode>> {
        Ok(None)
    }
}

struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_ride_request(
        &self,
        driver_user_id: Uuid,
        payload: RideOfferPayload,
    ) -> anyhow::Result<()> {
        tracing::info!(%driver_user_id, ride_id = %payload.ride_id, "notify: ride request");
        Ok(())
    }

    async fn send_ride_accepted(
        &self,
        rider_id: Uuid,
        payload: RideAcceptedPayload,
    ) -> anyhow::Result<()> {
        tracing::info!(%rider_id, ride_id = %payload.ride_id, "notify: ride accepted");
        Ok(())
    }

    async fn send_status_update(
        &self,
        user_id: Uuid,
        payload: RideStatusPayload,
    ) -> anyhow::Result<()> {
        tracing::info!(%user_id, ride_id = %payload.ride_id, status = %payload.status, "notify: status");
        Ok(())
    }

    async fn send_location_update(
        &self,
        user_id: Uuid,
        payload: RideLocationPayload,
    ) -> anyhow::Result<()> {
        tracing::debug!(%user_id, ride_id = %payload.ride_id, "notify: location");
        Ok(())
    }

    async fn broadcast_to_all(&self, _message: serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }
}

struct NoSavedLocations;

#[async_trait]
impl SavedLocations for NoSavedLocations {
    async fn resolve(
        &self,
        _user_id: Uuid,
        _location_id: Uuid,
    ) -> anyhow::Result<Option<SavedLocation>> {
        Ok(None)
    }
}

/// Initializes DB, runs migrations, and constructs the repository/store.
async fn init_store(cfg: &DispatchConfig) -> anyhow::Result<Arc<RideStore>> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let repo = Arc::new(SqlxRideRepository::new(db.pool.as_ref().clone()));
    Ok(Arc::new(RideStore::new(repo, cfg.busy_marker_ttl_ms)))
}

fn bootstrap_collaborators() -> Collaborators {
    Collaborators {
        pricing: Arc::new(FlatRatePricing),
        wallet: Arc::new(LoggingWallet),
        tracking: Arc::new(EmptyTracking),
        drivers: Arc::new(EmptyDrivers),
        ratings: Arc::new(DefaultRatings),
        promotions: Arc::new(NoPromotions),
        notifier: Arc::new(LoggingNotifier),
        saved_locations: Arc::new(NoSavedLocations),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting dispatch backend...");

    let cfg = DispatchConfig::from_env();
    let counters = Counters::default();

    let store = init_store(&cfg).await?;
    let ext = bootstrap_collaborators();

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

    let orchestrator = Arc::new(DispatchOrchestrator::new(
        store.clone(),
        collector.clone(),
        dispatcher,
        ext.clone(),
        counters.clone(),
        cfg.clone(),
    ));

    // The batch callback re-enters the orchestrator: wire it only after
    // both sides exist.
    orchestrator.register_batch_callback();
    collector.spawn_expiry_scanner();

    maintenance::start_request_sweeper(store.clone(), counters.clone(), cfg.request_sweep_ms);
    maintenance::start_hold_sweeper(
        store.clone(),
        ext.wallet.clone(),
        counters.clone(),
        cfg.hold_sweep_ms,
    );
    maintenance::start_location_sweeper(
        ext.tracking.clone(),
        counters.clone(),
        cfg.location_sweep_ms,
        cfg.stale_location_ms,
    );
    maintenance::start_scheduled_catchup(orchestrator, store, cfg.request_sweep_ms);

    tracing::info!("Dispatch backend started; waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    Ok(())
}
