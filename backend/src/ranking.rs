//! Driver ranker: scores candidate drivers 0–100 on a weighted four-factor
//! model and returns them sorted best-first.
//!
//! A per-driver fetch failure zeroes the affected components and logs; it
//! never excludes the driver on its own.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::contracts::drivers::Drivers;
use crate::contracts::ratings::{DriverRatingStats, Ratings};
use crate::contracts::tracking::Tracking;
use crate::geo;

/// Sentinel distance for a candidate whose tracked location could not be
/// fetched: far enough to never earn a proximity bonus or win a tie-break.
const UNKNOWN_DISTANCE_KM: f64 = 99_999.0;

/// Computed per (driver, pickup) pair; never persisted.
#[derive(Clone, Debug)]
pub struct DriverRankingScore {
    /// Driver user id.
    pub driver_id: Uuid,
    pub driver_name: String,
    pub rating_score: f64,
    pub acceptance_score: f64,
    pub cancellation_score: f64,
    pub completion_score: f64,
    pub total_score: f64,
    pub distance_km: f64,
    pub eta_secs: u64,
    /// 1-based position after sorting.
    pub rank: usize,
}

/// Pure scoring of the four components from rating stats.
///
/// - rating: (rating / 5) x 40, zero when unrated
/// - acceptance: rate x 30
/// - cancellation: (1 - rate) x 20
/// - completion: (1 - cancellation rate) x 10, zero with no ride history
pub fn score_components(stats: &DriverRatingStats) -> (f64, f64, f64, f64) {
    let rating_score = if stats.rating > 0.0 {
        (stats.rating / 5.0).clamp(0.0, 1.0) * 40.0
    } else {
        0.0
    };
    let acceptance_score = stats.acceptance_rate.clamp(0.0, 1.0) * 30.0;
    let cancel_clamped = stats.cancellation_rate.clamp(0.0, 1.0);
    let cancellation_score = (1.0 - cancel_clamped) * 20.0;
    let completion_score = if stats.total_rides > 0 {
        (1.0 - cancel_clamped) * 10.0
    } else {
        0.0
    };
    (
        rating_score,
        acceptance_score,
        cancellation_score,
        completion_score,
    )
}

#[derive(Clone)]
pub struct DriverRanker {
    drivers: Arc<dyn Drivers>,
    tracking: Arc<dyn Tracking>,
    ratings: Arc<dyn Ratings>,
    average_speed_kmh: f64,
}

impl DriverRanker {
    pub fn new(
        drivers: Arc<dyn Drivers>,
        tracking: Arc<dyn Tracking>,
        ratings: Arc<dyn Ratings>,
        average_speed_kmh: f64,
    ) -> Self {
        Self {
            drivers,
            tracking,
            ratings,
            average_speed_kmh,
        }
    }

    /// Score every candidate concurrently and return them sorted by total
    /// score descending, shorter pickup distance breaking ties, with rank
    /// positions assigned 1..N.
    #[instrument(skip(self, candidate_ids), target = "ranking", fields(candidates = candidate_ids.len()))]
    pub async fn rank(
        &self,
        candidate_ids: &[Uuid],
        pickup_lat: f64,
        pickup_lon: f64,
    ) -> Vec<DriverRankingScore> {
        let scored = join_all(
            candidate_ids
                .iter()
                .map(|id| self.score_one(*id, pickup_lat, pickup_lon)),
        )
        .await;

        let mut out: Vec<DriverRankingScore> = scored.into_iter().collect();
        out.sort_by(|a, b| {
            b.total_score
                .total_cmp(&a.total_score)
                .then(a.distance_km.total_cmp(&b.distance_km))
        });
        for (i, s) in out.iter_mut().enumerate() {
            s.rank = i + 1;
        }
        out
    }

    async fn score_one(
        &self,
        driver_id: Uuid,
        pickup_lat: f64,
        pickup_lon: f64,
    ) -> DriverRankingScore {
        let driver_name = match self.drivers.find_by_user_id(driver_id).await {
            Ok(Some(profile)) => profile.full_name,
            Ok(None) => {
                warn!(driver_id = %driver_id, "scoring driver without a profile");
                String::new()
            }
            Err(e) => {
                warn!(driver_id = %driver_id, error = %e, "driver profile fetch failed while scoring");
                String::new()
            }
        };

        let (distance_km, eta_secs) = match self.tracking.driver_location(driver_id).await {
            Ok(Some(loc)) => {
                let d = geo::haversine_km(pickup_lat, pickup_lon, loc.lat, loc.lon);
                (d, geo::eta_secs(d, self.average_speed_kmh))
            }
            Ok(None) => {
                warn!(driver_id = %driver_id, "scoring driver without a tracked location");
                (UNKNOWN_DISTANCE_KM, 0)
            }
            Err(e) => {
                warn!(driver_id = %driver_id, error = %e, "location fetch failed while scoring");
                (UNKNOWN_DISTANCE_KM, 0)
            }
        };

        let stats = match self.ratings.driver_rating_stats(driver_id).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(driver_id = %driver_id, error = %e, "rating stats fetch failed while scoring; zeroing components");
                DriverRatingStats::default()
            }
        };

        let (rating_score, acceptance_score, cancellation_score, completion_score) =
            score_components(&stats);

        DriverRankingScore {
            driver_id,
            driver_name,
            rating_score,
            acceptance_score,
            cancellation_score,
            completion_score,
            total_score: rating_score + acceptance_score + cancellation_score + completion_score,
            distance_km,
            eta_secs,
            rank: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestCollaborators;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    const PICKUP: (f64, f64) = (12.9716, 77.5946);

    fn stats(rating: f64, acceptance: f64, cancellation: f64, rides: u64) -> DriverRatingStats {
        DriverRatingStats {
            rating,
            acceptance_rate: acceptance,
            cancellation_rate: cancellation,
            total_rides: rides,
        }
    }

    fn ranker(world: &TestCollaborators) -> DriverRanker {
        DriverRanker::new(
            world.drivers.clone(),
            world.tracking.clone(),
            world.ratings.clone(),
            40.0,
        )
    }

    #[test]
    fn components_for_a_strong_driver() {
        let (r, a, c, f) = score_components(&stats(4.5, 0.9, 0.05, 320));
        assert!((r - 36.0).abs() < 1e-9);
        assert!((a - 27.0).abs() < 1e-9);
        assert!((c - 19.0).abs() < 1e-9);
        assert!((f - 9.5).abs() < 1e-9);
    }

    #[test]
    fn unrated_and_new_drivers_lose_their_conditional_components() {
        let (r, _, _, f) = score_components(&stats(0.0, 0.5, 0.0, 0));
        assert_eq!(r, 0.0);
        assert_eq!(f, 0.0);
    }

    #[test]
    fn out_of_range_rates_are_clamped() {
        let (r, a, c, f) = score_components(&stats(9.0, 1.7, -0.3, 10));
        assert_eq!(r, 40.0);
        assert_eq!(a, 30.0);
        assert_eq!(c, 20.0);
        assert_eq!(f, 10.0);
    }

    #[tokio::test]
    async fn rank_orders_by_total_then_distance() {
        let world = TestCollaborators::new();
        let near_strong = Uuid::new_v4();
        let far_strong = Uuid::new_v4();
        let weak = Uuid::new_v4();

        // Identical stats for the two strong drivers; only distance differs.
        world.seed_driver(near_strong, 12.9726, 77.5946, "economy", stats(4.8, 0.95, 0.02, 500), 0);
        world.seed_driver(far_strong, 13.0016, 77.5946, "economy", stats(4.8, 0.95, 0.02, 500), 0);
        world.seed_driver(weak, 12.9717, 77.5947, "economy", stats(3.0, 0.4, 0.5, 20), 0);

        let ranked = ranker(&world)
            .rank(&[weak, far_strong, near_strong], PICKUP.0, PICKUP.1)
            .await;

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].driver_id, near_strong, "distance breaks the tie");
        assert_eq!(ranked[1].driver_id, far_strong);
        assert_eq!(ranked[2].driver_id, weak);
        assert_eq!(
            ranked.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(ranked[0].eta_secs < ranked[1].eta_secs);
    }

    #[traced_test]
    #[tokio::test]
    async fn failed_stats_fetch_scores_zero_but_keeps_the_driver() {
        let world = TestCollaborators::new();
        let healthy = Uuid::new_v4();
        let broken = Uuid::new_v4();

        world.seed_driver(healthy, 12.9726, 77.5946, "economy", stats(4.0, 0.8, 0.1, 100), 0);
        world.seed_driver(broken, 12.9721, 77.5946, "economy", stats(5.0, 1.0, 0.0, 999), 0);
        world.ratings.failing_drivers.lock().push(broken);

        let ranked = ranker(&world).rank(&[healthy, broken], PICKUP.0, PICKUP.1).await;

        assert_eq!(ranked.len(), 2, "failure alone never excludes a driver");
        assert_eq!(ranked[0].driver_id, healthy);
        assert_eq!(ranked[1].driver_id, broken);
        assert_eq!(ranked[1].total_score, 0.0);
        assert!(logs_contain("rating stats fetch failed while scoring"));
    }

    #[tokio::test]
    async fn unknown_location_never_earns_the_proximity_sentinel() {
        let world = TestCollaborators::new();
        let untracked = Uuid::new_v4();
        // Profile and stats exist, but no tracked location.
        world.drivers.add_simple(untracked, "economy");
        world.ratings.set_driver(untracked, stats(4.0, 0.8, 0.1, 100));

        let ranked = ranker(&world).rank(&[untracked], PICKUP.0, PICKUP.1).await;
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].distance_km > 1_000.0);
        assert!(ranked[0].total_score > 0.0);
    }

    proptest! {
        #[test]
        fn total_is_bounded_and_equals_component_sum(
            rating in -1.0f64..7.0,
            acceptance in -0.5f64..1.5,
            cancellation in -0.5f64..1.5,
            rides in 0u64..1_000,
        ) {
            let s = stats(rating, acceptance, cancellation, rides);
            let (r, a, c, f) = score_components(&s);
            let total = r + a + c + f;
            prop_assert!((0.0..=100.0).contains(&total));
            prop_assert!((0.0..=40.0).contains(&r));
            prop_assert!((0.0..=30.0).contains(&a));
            prop_assert!((0.0..=20.0).contains(&c));
            prop_assert!((0.0..=10.0).contains(&f));
        }
    }
}
