use uuid::Uuid;

/// One request paired with one driver, with the evidence behind the pick.
#[derive(Clone, Debug)]
pub struct Assignment {
    pub ride_id: Uuid,
    /// Driver user id.
    pub driver_id: Uuid,
    pub confidence: f64,
    /// Driver-to-pickup distance carried over from ranking.
    pub distance_km: f64,
    pub eta_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BatchMatchingResult {
    pub batch_id: Uuid,
    pub assignments: Vec<Assignment>,
    pub unmatched_ride_ids: Vec<Uuid>,
    pub matched_count: usize,
    pub duration_ms: u64,
}
