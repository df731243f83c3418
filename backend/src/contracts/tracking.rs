use async_trait::async_trait;
use uuid::Uuid;

/// A driver position as last reported to the tracking service.
#[derive(Clone, Debug)]
pub struct TrackedDriver {
    pub driver_id: Uuid,
    pub lat: f64,
    pub lon: f64,
    pub updated_at_ms: u64,
}

/// Live geo-index contract.
#[async_trait]
pub trait Tracking: Send + Sync + 'static {
    /// Drivers of `vehicle_class` within `radius_km` of the point,
    /// nearest first, at most `limit`. With `only_available` set, drivers
    /// on an active ride are excluded.
    async fn find_nearby_drivers(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        vehicle_class: &str,
        only_available: bool,
        limit: usize,
    ) -> anyhow::Result<Vec<TrackedDriver>>;

    async fn driver_location(&self, driver_id: Uuid) -> anyhow::Result<Option<TrackedDriver>>;

    /// Drop locations not refreshed since `cutoff_ms`; returns how many
    /// were removed. Driven by the stale-location sweeper.
    async fn prune_stale(&self, cutoff_ms: u64) -> anyhow::Result<usize>;
}
