use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Offer pushed to a candidate driver, with everything needed to decide
/// within the expiry window.
#[derive(Clone, Debug, Serialize)]
pub struct RideOfferPayload {
    pub ride_id: Uuid,
    pub request_id: Uuid,
    pub pickup_address: String,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_address: String,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
    pub fare_estimate: f64,
    pub distance_to_pickup_km: f64,
    pub pickup_eta_secs: u64,
    pub expires_in_secs: u64,
    pub sent_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RideAcceptedPayload {
    pub ride_id: Uuid,
    pub driver_name: String,
    pub vehicle_plate: String,
    pub pickup_eta_secs: u64,
    pub sent_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RideStatusPayload {
    pub ride_id: Uuid,
    pub status: String,
    pub detail: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RideLocationPayload {
    pub ride_id: Uuid,
    pub lat: f64,
    pub lon: f64,
    pub bearing_deg: f64,
    pub sent_at: DateTime<Utc>,
}

/// Real-time delivery capability, passed into the orchestrator at
/// construction. Instantiated once at process start and torn down on
/// shutdown after draining subscribers; nothing in the core reaches for
/// global state to find it.
///
/// Delivery is best-effort: a failed push is the implementation's problem
/// to log, never a reason to fail a dispatch.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_ride_request(
        &self,
        driver_user_id: Uuid,
        payload: RideOfferPayload,
    ) -> anyhow::Result<()>;

    async fn send_ride_accepted(
        &self,
        rider_id: Uuid,
        payload: RideAcceptedPayload,
    ) -> anyhow::Result<()>;

    async fn send_status_update(
        &self,
        user_id: Uuid,
        payload: RideStatusPayload,
    ) -> anyhow::Result<()>;

    async fn send_location_update(
        &self,
        user_id: Uuid,
        payload: RideLocationPayload,
    ) -> anyhow::Result<()>;

    async fn broadcast_to_all(&self, message: serde_json::Value) -> anyhow::Result<()>;
}
