use async_trait::async_trait;
use uuid::Uuid;

/// Aggregated driver statistics used by the ranker.
/// All rates are fractions in [0, 1]; `rating` is the 0–5 star average.
#[derive(Clone, Copy, Debug, Default)]
pub struct DriverRatingStats {
    pub rating: f64,
    pub acceptance_rate: f64,
    pub cancellation_rate: f64,
    pub total_rides: u64,
}

#[async_trait]
pub trait Ratings: Send + Sync + 'static {
    async fn driver_rating_stats(&self, driver_user_id: Uuid) -> anyhow::Result<DriverRatingStats>;

    /// Rider's star average; the offer dispatcher keys its radius ladder
    /// off this.
    async fn rider_rating(&self, rider_id: Uuid) -> anyhow::Result<f64>;
}
