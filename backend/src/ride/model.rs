use anyhow::anyhow;
use uuid::Uuid;

/// Ride lifecycle states. Monotonic except for explicit cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RideStatus {
    Searching,
    Scheduled,
    Accepted,
    Arrived,
    Started,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Searching => "searching",
            Self::Scheduled => "scheduled",
            Self::Accepted => "accepted",
            Self::Arrived => "arrived",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "searching" => Ok(Self::Searching),
            "scheduled" => Ok(Self::Scheduled),
            "accepted" => Ok(Self::Accepted),
            "arrived" => Ok(Self::Arrived),
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(anyhow!("unknown ride status: {other}")),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// States in which a driver is bound to the ride.
    pub fn has_assigned_driver(&self) -> bool {
        matches!(self, Self::Accepted | Self::Arrived | Self::Started)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelledBy {
    Rider,
    Driver,
    System,
}

impl CancelledBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rider => "rider",
            Self::Driver => "driver",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "rider" => Ok(Self::Rider),
            "driver" => Ok(Self::Driver),
            "system" => Ok(Self::System),
            other => Err(anyhow!("unknown cancellation party: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub address: String,
}

/// Pre-ride estimates, fixed at request time.
#[derive(Clone, Copy, Debug)]
pub struct RideEstimate {
    pub distance_km: f64,
    pub duration_secs: u64,
    pub fare: f64,
    pub surge_multiplier: f64,
}

/// Actuals, populated on completion and never before.
#[derive(Clone, Copy, Debug, Default)]
pub struct RideActuals {
    pub distance_km: Option<f64>,
    pub duration_secs: Option<u64>,
    pub fare: Option<f64>,
    pub driver_payout: Option<f64>,
    pub rider_payable: Option<f64>,
}

/// Each timestamp is set exactly once by its transition; never cleared.
#[derive(Clone, Copy, Debug, Default)]
pub struct RideTimestamps {
    pub requested_at_ms: u64,
    pub scheduled_at_ms: Option<u64>,
    pub accepted_at_ms: Option<u64>,
    pub arrived_at_ms: Option<u64>,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub cancelled_at_ms: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct Cancellation {
    pub by: CancelledBy,
    pub reason: String,
}

/// The authoritative ride aggregate. Owned by the state machine; everyone
/// else reads projections of it.
#[derive(Clone, Debug)]
pub struct Ride {
    pub ride_id: Uuid,
    pub rider_id: Uuid,
    /// Driver *user id*. None until the atomic promotion binds one.
    pub driver_id: Option<Uuid>,
    pub vehicle_class: String,
    pub status: RideStatus,
    pub pickup: Location,
    pub dropoff: Location,
    pub estimate: RideEstimate,
    pub actuals: RideActuals,
    pub wallet_hold_id: Option<Uuid>,
    pub rider_pin: String,
    pub timestamps: RideTimestamps,
    pub cancellation: Option<Cancellation>,
}

impl Ride {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when `user_id` is the assigned driver.
    pub fn driver_is(&self, user_id: &Uuid) -> bool {
        self.driver_id.as_ref() == Some(user_id)
    }

    /// True when `user_id` is either party of this ride.
    pub fn involves(&self, user_id: &Uuid) -> bool {
        self.rider_id == *user_id || self.driver_is(user_id)
    }

    /// The driver-id/status invariant: a driver is attached iff the ride
    /// is in a post-accept state (cancellation keeps whatever was bound).
    pub fn driver_binding_consistent(&self) -> bool {
        match self.status {
            RideStatus::Searching | RideStatus::Scheduled => self.driver_id.is_none(),
            RideStatus::Accepted | RideStatus::Arrived | RideStatus::Started
            | RideStatus::Completed => self.driver_id.is_some(),
            RideStatus::Cancelled => true,
        }
    }
}

/// Offer statuses. `Pending` is the only open state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    CancelledBySystem,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::CancelledBySystem => "cancelled_by_system",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "cancelled_by_system" => Ok(Self::CancelledBySystem),
            other => Err(anyhow!("unknown offer status: {other}")),
        }
    }
}

/// One outstanding offer from the dispatcher to a specific driver.
#[derive(Clone, Debug)]
pub struct RideRequest {
    pub request_id: Uuid,
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub status: OfferStatus,
    pub sent_at_ms: u64,
    pub expires_at_ms: u64,
    pub responded_at_ms: Option<u64>,
}

impl RideRequest {
    /// An offer at or past its expiry is overdue: it flips to `expired`,
    /// never to `accepted`.
    pub fn is_overdue(&self, now_ms: u64) -> bool {
        self.status == OfferStatus::Pending && now_ms >= self.expires_at_ms
    }
}
