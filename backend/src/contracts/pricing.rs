use async_trait::async_trait;

/// Fare computation contract.
///
/// The core never prices rides itself; it feeds distance/duration estimates
/// in and receives currency amounts back.
#[async_trait]
pub trait Pricing: Send + Sync + 'static {
    /// Pre-ride fare estimate for a vehicle class, before surge and promo.
    async fn fare_estimate(
        &self,
        vehicle_class: &str,
        distance_km: f64,
        duration_secs: u64,
    ) -> anyhow::Result<f64>;

    /// Combined time-of-day / demand surge multiplier at a point.
    /// 1.0 means no surge.
    async fn combined_surge(&self, lat: f64, lon: f64, at_ms: u64) -> anyhow::Result<f64>;

    /// Refined ETA estimate for display purposes.
    async fn eta_estimate(&self, distance_km: f64) -> anyhow::Result<u64>;

    /// Final fare from the actuals reported at completion, including the
    /// surge locked in at request time.
    async fn actual_fare(
        &self,
        vehicle_class: &str,
        distance_km: f64,
        duration_secs: u64,
        surge_multiplier: f64,
    ) -> anyhow::Result<f64>;
}
