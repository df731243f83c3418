use async_trait::async_trait;
use uuid::Uuid;

use crate::ride::model::{CancelledBy, OfferStatus, Ride, RideActuals, RideRequest, RideStatus};

/// Which side of a ride a listing is filtered by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RideRole {
    Rider,
    Driver,
}

/// Persistence contract for rides and ride requests.
///
/// Every guarded mutation is a conditional update keyed by the observed
/// prior status and returns whether a row changed; `false` means the race
/// was lost, never an infrastructure error.
#[async_trait]
pub trait RideRepository: Send + Sync + 'static {
    // ---- rides ----

    async fn create_ride(&self, ride: &Ride) -> anyhow::Result<()>;

    async fn fetch_ride(&self, ride_id: &Uuid) -> anyhow::Result<Option<Ride>>;

    async fn list_rides(
        &self,
        user_id: &Uuid,
        role: RideRole,
        status: Option<RideStatus>,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<Ride>>;

    /// The atomic `searching → accepted` promotion: one conditional update
    /// that also binds `driver_id` and stamps `accepted_at`. Exactly one
    /// caller can ever see `true` for a given ride.
    async fn try_accept(
        &self,
        ride_id: &Uuid,
        driver_user_id: &Uuid,
        now_ms: u64,
    ) -> anyhow::Result<bool>;

    /// Guarded transition from `from` to `to`, stamping the timestamp that
    /// belongs to `to` (if any). Used for arrived/started and for
    /// activating scheduled rides.
    async fn transition_status(
        &self,
        ride_id: &Uuid,
        from: RideStatus,
        to: RideStatus,
        now_ms: u64,
    ) -> anyhow::Result<bool>;

    /// `started → completed`, writing the actuals in the same statement.
    async fn complete_ride(
        &self,
        ride_id: &Uuid,
        actuals: &RideActuals,
        now_ms: u64,
    ) -> anyhow::Result<bool>;

    /// Guarded cancellation from the observed status, recording party and
    /// reason.
    async fn cancel_ride(
        &self,
        ride_id: &Uuid,
        from: RideStatus,
        by: CancelledBy,
        reason: &str,
        now_ms: u64,
    ) -> anyhow::Result<bool>;

    /// Attach (`Some`) or clear (`None`) the wallet hold reference.
    async fn set_wallet_hold(&self, ride_id: &Uuid, hold_id: Option<Uuid>) -> anyhow::Result<()>;

    /// Terminal rides still carrying a hold reference; fed to the stuck-
    /// hold sweeper.
    async fn rides_with_stuck_holds(&self, limit: usize) -> anyhow::Result<Vec<Ride>>;

    /// Scheduled rides whose activation time has passed.
    async fn fetch_due_scheduled(&self, now_ms: u64, limit: usize) -> anyhow::Result<Vec<Ride>>;

    // ---- ride requests (offers) ----

    async fn create_request(&self, request: &RideRequest) -> anyhow::Result<()>;

    async fn fetch_request(&self, request_id: &Uuid) -> anyhow::Result<Option<RideRequest>>;

    /// The pending request for a (ride, driver) pair, if one is open.
    async fn fetch_open_request(
        &self,
        ride_id: &Uuid,
        driver_user_id: &Uuid,
    ) -> anyhow::Result<Option<RideRequest>>;

    async fn requests_for_ride(&self, ride_id: &Uuid) -> anyhow::Result<Vec<RideRequest>>;

    /// Guarded offer transition; stamps `responded_at` when given.
    async fn update_request_status(
        &self,
        request_id: &Uuid,
        from: OfferStatus,
        to: OfferStatus,
        responded_at_ms: Option<u64>,
    ) -> anyhow::Result<bool>;

    /// Flip every still-pending sibling of `winner_request_id` to
    /// `cancelled_by_system`; returns how many were flipped.
    async fn cancel_sibling_requests(
        &self,
        ride_id: &Uuid,
        winner_request_id: &Uuid,
        now_ms: u64,
    ) -> anyhow::Result<u64>;

    /// Expire every pending request past its deadline; returns the count.
    async fn expire_overdue_requests(&self, now_ms: u64) -> anyhow::Result<u64>;
}
