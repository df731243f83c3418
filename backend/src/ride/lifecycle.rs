//! Pure lifecycle rules: the transition table, the wait-time surcharge, the
//! completion-radius gate, and the cancellation fee schedule.
//!
//! Nothing here touches storage. The repository's conditional updates
//! enforce these transitions atomically; this module is the single place
//! that says which transitions exist and what they cost.

use crate::config::DispatchConfig;
use crate::geo;
use crate::ride::model::{CancelledBy, RideStatus};

/// The legal forward edges of the state machine. Cancellation is handled
/// separately because it applies to every non-terminal state.
pub fn can_transition(from: RideStatus, to: RideStatus) -> bool {
    use RideStatus::*;
    matches!(
        (from, to),
        (Scheduled, Searching)
            | (Searching, Accepted)
            | (Accepted, Arrived)
            | (Accepted, Started)
            | (Arrived, Started)
            | (Started, Completed)
    )
}

pub fn can_cancel_from(status: RideStatus) -> bool {
    !status.is_terminal()
}

/// Surcharge for keeping the driver waiting at the pickup.
///
/// Free up to `wait_grace_secs`; past that, every begun minute costs
/// `wait_fee_per_minute`.
pub fn wait_surcharge(
    arrived_at_ms: u64,
    started_at_ms: u64,
    wait_grace_secs: u64,
    wait_fee_per_minute: f64,
) -> f64 {
    let wait_secs = started_at_ms.saturating_sub(arrived_at_ms) / 1_000;
    let extra = wait_secs.saturating_sub(wait_grace_secs);
    if extra == 0 {
        return 0.0;
    }
    let minutes = extra.div_ceil(60);
    minutes as f64 * wait_fee_per_minute
}

/// Completion gate: the driver must report within the configured radius of
/// the dropoff (plus a small tolerance for GPS jitter).
pub fn within_completion_radius(
    driver_lat: f64,
    driver_lon: f64,
    dropoff_lat: f64,
    dropoff_lon: f64,
    cfg: &DispatchConfig,
) -> bool {
    let d_m = geo::haversine_m(driver_lat, driver_lon, dropoff_lat, dropoff_lon);
    d_m <= cfg.completion_radius_m + cfg.completion_tolerance_m
}

/// Money consequences of a cancellation, by ride state and cancelling party.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CancelSettlement {
    /// Release the hold in full; nobody is charged.
    ReleaseOnly,
    /// Capture `capture` from the rider's hold and credit it to the driver;
    /// the remainder of the hold is released.
    RiderFee { capture: f64 },
    /// Release the rider's hold, deduct `penalty` from the driver, and
    /// refund `rider_compensation` to the rider.
    DriverPenalty {
        penalty: f64,
        rider_compensation: f64,
    },
}

pub fn cancellation_settlement(
    status: RideStatus,
    by: CancelledBy,
    cfg: &DispatchConfig,
) -> CancelSettlement {
    use RideStatus::*;
    match (status, by) {
        (Searching | Scheduled, _) => CancelSettlement::ReleaseOnly,
        (Accepted | Arrived, CancelledBy::Rider) => CancelSettlement::RiderFee {
            capture: cfg.rider_cancel_fee_accepted,
        },
        (Accepted | Arrived, CancelledBy::Driver) => CancelSettlement::DriverPenalty {
            penalty: cfg.driver_cancel_penalty_accepted,
            rider_compensation: 0.0,
        },
        (Started, CancelledBy::Rider) => CancelSettlement::RiderFee {
            capture: cfg.rider_cancel_fee_started,
        },
        (Started, CancelledBy::Driver) => CancelSettlement::DriverPenalty {
            penalty: cfg.driver_cancel_penalty_started,
            rider_compensation: cfg.driver_cancel_penalty_started * cfg.driver_penalty_rider_share,
        },
        // System cancellations (no capacity, sweepers) never charge anyone.
        (_, CancelledBy::System) => CancelSettlement::ReleaseOnly,
        // Terminal states cannot be cancelled; callers reject them first.
        (Completed | Cancelled, _) => CancelSettlement::ReleaseOnly,
    }
}

/// Split of the captured fare between driver payout and rider payable.
pub fn payout_split(fare: f64, driver_share: f64) -> (f64, f64) {
    let payout = (fare * driver_share).max(0.0);
    (payout, fare)
}
