#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Database connection string.
    pub database_url: String,

    // =========================
    // Batch collection
    // =========================
    /// How long an open batch accumulates requests before it is handed to
    /// the matcher.
    ///
    /// Requests of the same vehicle class arriving within this window share
    /// one driver search instead of each running their own.
    pub batch_window_ms: u64,

    /// A batch closes early once it holds this many requests, without
    /// waiting for the window to elapse.
    pub max_batch_size: usize,

    /// Cadence of the collector's expiry scan.
    pub batch_scan_ms: u64,

    /// Delay between a batch firing its expiry callback and its removal
    /// from the collector, so the callback can still snapshot the requests.
    pub batch_delete_grace_ms: u64,

    // =========================
    // Batch matching
    // =========================
    /// Minimum per-pair confidence for the matcher to assign a driver.
    ///
    /// - 0.0 assigns any ranked driver
    /// - 1.0 assigns only perfect scores carrying the proximity bonus
    pub acceptance_threshold: f64,

    // =========================
    // Offer dispatch
    // =========================
    /// Number of top-ranked candidates that receive a timed offer at the
    /// first radius with any candidates.
    pub offer_fanout: usize,

    /// Lifetime of a single offer. Past this the offer flips to `expired`
    /// and the driver can no longer accept it.
    pub offer_ttl_ms: u64,

    /// Poll cadence inside each offer task.
    ///
    /// Worst case, a driver response is observed one poll late; the winner
    /// channel shortcuts the happy path.
    pub offer_poll_ms: u64,

    /// Overall deadline for one dispatch attempt across all radii and
    /// offers. Past this the attempt fails with "no driver accepted".
    pub dispatch_deadline_ms: u64,

    /// Pause between search radii, letting driver locations refresh.
    pub radius_pause_ms: u64,

    /// Upper bound on candidates requested from Tracking per radius.
    pub candidate_limit: usize,

    // =========================
    // Estimates
    // =========================
    /// Assumed average driving speed for straight-line ETA estimates.
    pub average_speed_kmh: f64,

    // =========================
    // Money
    // =========================
    /// Wallet hold lifetime. The hold's own expiry is the last line of
    /// defense; the sweeper releases stuck holds well before it.
    pub hold_ttl_secs: u64,

    /// Fraction of the captured fare credited to the driver.
    pub driver_payout_share: f64,

    /// Fee captured from the rider's hold when the rider cancels an
    /// `accepted` or `arrived` ride; credited to the driver.
    pub rider_cancel_fee_accepted: f64,

    /// Penalty deducted from the driver when the driver cancels an
    /// `accepted` or `arrived` ride.
    pub driver_cancel_penalty_accepted: f64,

    /// Fee captured from the rider's hold when the rider cancels a
    /// `started` ride; credited to the driver.
    pub rider_cancel_fee_started: f64,

    /// Penalty deducted from the driver when the driver cancels a
    /// `started` ride.
    pub driver_cancel_penalty_started: f64,

    /// Share of the driver's started-ride penalty refunded to the rider as
    /// compensation.
    pub driver_penalty_rider_share: f64,

    /// Wait time at the pickup the rider gets for free.
    pub wait_grace_secs: u64,

    /// Surcharge per whole minute of waiting beyond the grace period.
    pub wait_fee_per_minute: f64,

    // =========================
    // Completion
    // =========================
    /// The driver must report completion within this distance of the
    /// dropoff point.
    pub completion_radius_m: f64,

    /// Slack added to the completion radius to absorb floating-point and
    /// GPS jitter.
    pub completion_tolerance_m: f64,

    // =========================
    // Background maintenance
    // =========================
    /// Cadence of the sweep that expires overdue pending offers.
    pub request_sweep_ms: u64,

    /// Cadence of the sweep that releases holds stuck on terminal rides.
    pub hold_sweep_ms: u64,

    /// Cadence of the sweep that prunes stale tracked driver locations.
    pub location_sweep_ms: u64,

    /// A tracked location older than this is considered stale.
    pub stale_location_ms: u64,

    /// TTL on busy-marker / active-ride cache entries, bounding staleness
    /// if a process crashes mid-ride.
    pub busy_marker_ttl_ms: u64,

    // =========================
    // Catalog
    // =========================
    /// Vehicle class ids this deployment accepts.
    pub vehicle_classes: Vec<String>,
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://dispatch_dev.db".to_string());

        Self {
            database_url,

            // Batching: short window, small batches.
            batch_window_ms: 10_000,
            max_batch_size: 10,
            batch_scan_ms: 1_000,
            batch_delete_grace_ms: 100,

            acceptance_threshold: 0.6,

            // Offers: three candidates, 10s each, 30s overall.
            offer_fanout: 3,
            offer_ttl_ms: 10_000,
            offer_poll_ms: 1_000,
            dispatch_deadline_ms: 30_000,
            radius_pause_ms: 1_000,
            candidate_limit: 15,

            average_speed_kmh: 40.0,

            hold_ttl_secs: 1_800,
            driver_payout_share: 0.80,
            rider_cancel_fee_accepted: 2.0,
            driver_cancel_penalty_accepted: 3.0,
            rider_cancel_fee_started: 5.0,
            driver_cancel_penalty_started: 10.0,
            driver_penalty_rider_share: 0.5,
            wait_grace_secs: 180,
            wait_fee_per_minute: 1.0,

            completion_radius_m: 100.0,
            completion_tolerance_m: 1.0,

            request_sweep_ms: 10_000,
            hold_sweep_ms: 300_000,
            location_sweep_ms: 60_000,
            stale_location_ms: 120_000,
            busy_marker_ttl_ms: 1_800_000,

            vehicle_classes: vec![
                "economy".to_string(),
                "comfort".to_string(),
                "premium".to_string(),
                "xl".to_string(),
            ],
        }
    }

    pub fn knows_vehicle_class(&self, class: &str) -> bool {
        self.vehicle_classes.iter().any(|c| c == class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dispatch_policy() {
        let cfg = DispatchConfig::from_env();
        assert_eq!(cfg.batch_window_ms, 10_000);
        assert_eq!(cfg.offer_fanout, 3);
        assert_eq!(cfg.dispatch_deadline_ms, 30_000);
        assert!((cfg.acceptance_threshold - 0.6).abs() < f64::EPSILON);
        assert!(cfg.knows_vehicle_class("economy"));
        assert!(!cfg.knows_vehicle_class("hovercraft"));
    }
}
