//! Batch matcher: greedy one-to-one assignment of ranked drivers to batch
//! requests above a confidence threshold.
//!
//! Pure function of its inputs; an empty assignment list is a valid result.

use std::time::Instant;
use uuid::Uuid;

use crate::batch::BatchRequest;
use crate::matching::types::{Assignment, BatchMatchingResult};
use crate::ranking::DriverRankingScore;

/// Per (request, driver) confidence in [0, 1]: intrinsic driver quality
/// plus a proximity bonus. The distance is the driver-to-pickup distance
/// computed by the ranker, not a re-derivation.
pub fn confidence(total_score: f64, distance_km: f64) -> f64 {
    let base = total_score / 100.0;
    let bonus = if distance_km < 0.5 {
        0.10
    } else if distance_km < 2.0 {
        0.05
    } else if distance_km < 5.0 {
        0.0
    } else {
        -0.05
    };
    (base + bonus).clamp(0.0, 1.0)
}

/// Assign drivers to requests greedily.
///
/// Requests are served in order of trip distance descending, so the hardest
/// trips pick from the full pool. Each request takes the highest-confidence
/// driver at or above `acceptance_threshold`; equal confidence falls back
/// to the ranker's pre-sort order. Assigned drivers leave the pool.
pub fn match_batch(
    batch_id: Uuid,
    requests: &[BatchRequest],
    ranked: &[DriverRankingScore],
    acceptance_threshold: f64,
) -> BatchMatchingResult {
    let started = Instant::now();

    let mut pool: Vec<&DriverRankingScore> = ranked.iter().collect();

    let mut ordered: Vec<&BatchRequest> = requests.iter().collect();
    ordered.sort_by(|a, b| b.trip_distance_km.total_cmp(&a.trip_distance_km));

    let mut assignments = Vec::new();
    let mut unmatched_ride_ids = Vec::new();

    for request in ordered {
        let mut best: Option<(usize, f64)> = None;
        for (i, driver) in pool.iter().enumerate() {
            let c = confidence(driver.total_score, driver.distance_km);
            if c < acceptance_threshold {
                continue;
            }
            // Strictly-greater keeps the pre-sort order on ties.
            if best.is_none_or(|(_, bc)| c > bc) {
                best = Some((i, c));
            }
        }

        match best {
            Some((i, c)) => {
                let driver = pool.remove(i);
                assignments.push(Assignment {
                    ride_id: request.ride_id,
                    driver_id: driver.driver_id,
                    confidence: c,
                    distance_km: driver.distance_km,
                    eta_secs: driver.eta_secs,
                });
            }
            None => unmatched_ride_ids.push(request.ride_id),
        }
    }

    let matched_count = assignments.len();
    BatchMatchingResult {
        batch_id,
        assignments,
        unmatched_ride_ids,
        matched_count,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}
