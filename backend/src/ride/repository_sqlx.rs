use anyhow::{Context, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::ride::model::{
    CancelledBy, Cancellation, Location, OfferStatus, Ride, RideActuals, RideEstimate, RideRequest,
    RideStatus, RideTimestamps,
};
use crate::ride::repository::{RideRepository, RideRole};

const RIDE_COLUMNS: &str = "\
ride_id, rider_id, driver_id, vehicle_class, status, \
pickup_lat, pickup_lon, pickup_address, \
dropoff_lat, dropoff_lon, dropoff_address, \
estimated_distance_km, estimated_duration_secs, estimated_fare, surge_multiplier, \
actual_distance_km, actual_duration_secs, actual_fare, driver_payout, rider_payable, \
wallet_hold_id, rider_pin, \
scheduled_at_ms, requested_at_ms, accepted_at_ms, arrived_at_ms, started_at_ms, \
completed_at_ms, cancelled_at_ms, cancelled_by, cancel_reason";

const REQUEST_COLUMNS: &str = "\
request_id, ride_id, driver_id, status, sent_at_ms, expires_at_ms, responded_at_ms";

/// SQLx-backed implementation of RideRepository.
/// Responsible only for persistence and row mapping; every race-sensitive
/// mutation is a single conditional UPDATE judged by `rows_affected()`.
pub struct SqlxRideRepository {
    pool: AnyPool,
}

impl SqlxRideRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl RideRepository for SqlxRideRepository {
    async fn create_ride(&self, ride: &Ride) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO rides (
  ride_id, rider_id, driver_id, vehicle_class, status,
  pickup_lat, pickup_lon, pickup_address,
  dropoff_lat, dropoff_lon, dropoff_address,
  estimated_distance_km, estimated_duration_secs, estimated_fare, surge_multiplier,
  actual_distance_km, actual_duration_secs, actual_fare, driver_payout, rider_payable,
  wallet_hold_id, rider_pin,
  scheduled_at_ms, requested_at_ms, accepted_at_ms, arrived_at_ms, started_at_ms,
  completed_at_ms, cancelled_at_ms, cancelled_by, cancel_reason
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(ride.ride_id.to_string())
        .bind(ride.rider_id.to_string())
        .bind(ride.driver_id.map(|d| d.to_string()))
        .bind(&ride.vehicle_class)
        .bind(ride.status.as_str())
        .bind(ride.pickup.lat)
        .bind(ride.pickup.lon)
        .bind(&ride.pickup.address)
        .bind(ride.dropoff.lat)
        .bind(ride.dropoff.lon)
        .bind(&ride.dropoff.address)
        .bind(ride.estimate.distance_km)
        .bind(u64_to_i64(ride.estimate.duration_secs)?)
        .bind(ride.estimate.fare)
        .bind(ride.estimate.surge_multiplier)
        .bind(ride.actuals.distance_km)
        .bind(opt_u64_to_i64(ride.actuals.duration_secs)?)
        .bind(ride.actuals.fare)
        .bind(ride.actuals.driver_payout)
        .bind(ride.actuals.rider_payable)
        .bind(ride.wallet_hold_id.map(|h| h.to_string()))
        .bind(&ride.rider_pin)
        .bind(opt_u64_to_i64(ride.timestamps.scheduled_at_ms)?)
        .bind(u64_to_i64(ride.timestamps.requested_at_ms)?)
        .bind(opt_u64_to_i64(ride.timestamps.accepted_at_ms)?)
        .bind(opt_u64_to_i64(ride.timestamps.arrived_at_ms)?)
        .bind(opt_u64_to_i64(ride.timestamps.started_at_ms)?)
        .bind(opt_u64_to_i64(ride.timestamps.completed_at_ms)?)
        .bind(opt_u64_to_i64(ride.timestamps.cancelled_at_ms)?)
        .bind(ride.cancellation.as_ref().map(|c| c.by.as_str()))
        .bind(ride.cancellation.as_ref().map(|c| c.reason.clone()))
        .execute(&self.pool)
        .await
        .context("insert ride")?;

        Ok(())
    }

    async fn fetch_ride(&self, ride_id: &Uuid) -> anyhow::Result<Option<Ride>> {
        let row = sqlx::query(&format!("SELECT {RIDE_COLUMNS} FROM rides WHERE ride_id = ?;"))
            .bind(ride_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_ride(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_rides(
        &self,
        user_id: &Uuid,
        role: RideRole,
        status: Option<RideStatus>,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<Ride>> {
        let party = match role {
            RideRole::Rider => "rider_id",
            RideRole::Driver => "driver_id",
        };

        let sql = if status.is_some() {
            format!(
                "SELECT {RIDE_COLUMNS} FROM rides WHERE {party} = ? AND status = ? \
                 ORDER BY requested_at_ms DESC LIMIT ? OFFSET ?;"
            )
        } else {
            format!(
                "SELECT {RIDE_COLUMNS} FROM rides WHERE {party} = ? \
                 ORDER BY requested_at_ms DESC LIMIT ? OFFSET ?;"
            )
        };

        let mut q = sqlx::query(&sql).bind(user_id.to_string());
        if let Some(s) = status {
            q = q.bind(s.as_str());
        }
        let rows = q
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_ride(&r) {
                Ok(ride) => out.push(ride),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the page
                    tracing::warn!(error = %e, "skipping malformed ride row");
                }
            }
        }
        Ok(out)
    }

    async fn try_accept(
        &self,
        ride_id: &Uuid,
        driver_user_id: &Uuid,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
UPDATE rides
SET status = 'accepted', driver_id = ?, accepted_at_ms = ?
WHERE ride_id = ? AND status = 'searching';
"#,
        )
        .bind(driver_user_id.to_string())
        .bind(u64_to_i64(now_ms)?)
        .bind(ride_id.to_string())
        .execute(&self.pool)
        .await
        .context("accept promotion")?;

        // CAS miss: the race was lost, not an error.
        if res.rows_affected() != 1 {
            tracing::debug!(
                ride_id = %ride_id,
                driver_id = %driver_user_id,
                "accept CAS miss; ride already left searching"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn transition_status(
        &self,
        ride_id: &Uuid,
        from: RideStatus,
        to: RideStatus,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        let res = match timestamp_column(to) {
            Some(col) => {
                let sql =
                    format!("UPDATE rides SET status = ?, {col} = ? WHERE ride_id = ? AND status = ?;");
                sqlx::query(&sql)
                    .bind(to.as_str())
                    .bind(u64_to_i64(now_ms)?)
                    .bind(ride_id.to_string())
                    .bind(from.as_str())
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("UPDATE rides SET status = ? WHERE ride_id = ? AND status = ?;")
                    .bind(to.as_str())
                    .bind(ride_id.to_string())
                    .bind(from.as_str())
                    .execute(&self.pool)
                    .await?
            }
        };

        if res.rows_affected() != 1 {
            tracing::debug!(
                ride_id = %ride_id,
                from = from.as_str(),
                to = to.as_str(),
                "transition CAS miss"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn complete_ride(
        &self,
        ride_id: &Uuid,
        actuals: &RideActuals,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
UPDATE rides
SET status = 'completed',
    completed_at_ms = ?,
    actual_distance_km = ?,
    actual_duration_secs = ?,
    actual_fare = ?,
    driver_payout = ?,
    rider_payable = ?
WHERE ride_id = ? AND status = 'started';
"#,
        )
        .bind(u64_to_i64(now_ms)?)
        .bind(actuals.distance_km)
        .bind(opt_u64_to_i64(actuals.duration_secs)?)
        .bind(actuals.fare)
        .bind(actuals.driver_payout)
        .bind(actuals.rider_payable)
        .bind(ride_id.to_string())
        .execute(&self.pool)
        .await
        .context("complete ride")?;

        Ok(res.rows_affected() == 1)
    }

    async fn cancel_ride(
        &self,
        ride_id: &Uuid,
        from: RideStatus,
        by: CancelledBy,
        reason: &str,
        now_ms: u64,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
UPDATE rides
SET status = 'cancelled', cancelled_at_ms = ?, cancelled_by = ?, cancel_reason = ?
WHERE ride_id = ? AND status = ?;
"#,
        )
        .bind(u64_to_i64(now_ms)?)
        .bind(by.as_str())
        .bind(reason)
        .bind(ride_id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .context("cancel ride")?;

        Ok(res.rows_affected() == 1)
    }

    async fn set_wallet_hold(&self, ride_id: &Uuid, hold_id: Option<Uuid>) -> anyhow::Result<()> {
        sqlx::query("UPDATE rides SET wallet_hold_id = ? WHERE ride_id = ?;")
            .bind(hold_id.map(|h| h.to_string()))
            .bind(ride_id.to_string())
            .execute(&self.pool)
            .await
            .context("set wallet hold")?;
        Ok(())
    }

    async fn rides_with_stuck_holds(&self, limit: usize) -> anyhow::Result<Vec<Ride>> {
        let rows = sqlx::query(&format!(
            "SELECT {RIDE_COLUMNS} FROM rides \
             WHERE status IN ('completed', 'cancelled') AND wallet_hold_id IS NOT NULL \
             LIMIT ?;"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_ride).collect()
    }

    async fn fetch_due_scheduled(&self, now_ms: u64, limit: usize) -> anyhow::Result<Vec<Ride>> {
        let rows = sqlx::query(&format!(
            "SELECT {RIDE_COLUMNS} FROM rides \
             WHERE status = 'scheduled' AND scheduled_at_ms IS NOT NULL AND scheduled_at_ms <= ? \
             LIMIT ?;"
        ))
        .bind(u64_to_i64(now_ms)?)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_ride).collect()
    }

    async fn create_request(&self, request: &RideRequest) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO ride_requests (request_id, ride_id, driver_id, status, sent_at_ms, expires_at_ms, responded_at_ms)
VALUES (?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(request.request_id.to_string())
        .bind(request.ride_id.to_string())
        .bind(request.driver_id.to_string())
        .bind(request.status.as_str())
        .bind(u64_to_i64(request.sent_at_ms)?)
        .bind(u64_to_i64(request.expires_at_ms)?)
        .bind(opt_u64_to_i64(request.responded_at_ms)?)
        .execute(&self.pool)
        .await
        .context("insert ride request")?;

        Ok(())
    }

    async fn fetch_request(&self, request_id: &Uuid) -> anyhow::Result<Option<RideRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM ride_requests WHERE request_id = ?;"
        ))
        .bind(request_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_request(&r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_open_request(
        &self,
        ride_id: &Uuid,
        driver_user_id: &Uuid,
    ) -> anyhow::Result<Option<RideRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM ride_requests \
             WHERE ride_id = ? AND driver_id = ? AND status = 'pending' LIMIT 1;"
        ))
        .bind(ride_id.to_string())
        .bind(driver_user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_request(&r)?)),
            None => Ok(None),
        }
    }

    async fn requests_for_ride(&self, ride_id: &Uuid) -> anyhow::Result<Vec<RideRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM ride_requests WHERE ride_id = ? ORDER BY sent_at_ms;"
        ))
        .bind(ride_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_request).collect()
    }

    async fn update_request_status(
        &self,
        request_id: &Uuid,
        from: OfferStatus,
        to: OfferStatus,
        responded_at_ms: Option<u64>,
    ) -> anyhow::Result<bool> {
        let res = match responded_at_ms {
            Some(at) => {
                sqlx::query(
                    "UPDATE ride_requests SET status = ?, responded_at_ms = ? \
                     WHERE request_id = ? AND status = ?;",
                )
                .bind(to.as_str())
                .bind(u64_to_i64(at)?)
                .bind(request_id.to_string())
                .bind(from.as_str())
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE ride_requests SET status = ? WHERE request_id = ? AND status = ?;",
                )
                .bind(to.as_str())
                .bind(request_id.to_string())
                .bind(from.as_str())
                .execute(&self.pool)
                .await?
            }
        };

        if res.rows_affected() != 1 {
            tracing::debug!(
                request_id = %request_id,
                from = from.as_str(),
                to = to.as_str(),
                "request transition CAS miss"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn cancel_sibling_requests(
        &self,
        ride_id: &Uuid,
        winner_request_id: &Uuid,
        now_ms: u64,
    ) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
UPDATE ride_requests
SET status = 'cancelled_by_system', responded_at_ms = ?
WHERE ride_id = ? AND request_id <> ? AND status = 'pending';
"#,
        )
        .bind(u64_to_i64(now_ms)?)
        .bind(ride_id.to_string())
        .bind(winner_request_id.to_string())
        .execute(&self.pool)
        .await
        .context("cancel sibling requests")?;

        Ok(res.rows_affected())
    }

    async fn expire_overdue_requests(&self, now_ms: u64) -> anyhow::Result<u64> {
        let res = sqlx::query(
            "UPDATE ride_requests SET status = 'expired' \
             WHERE status = 'pending' AND expires_at_ms <= ?;",
        )
        .bind(u64_to_i64(now_ms)?)
        .execute(&self.pool)
        .await
        .context("expire overdue requests")?;

        Ok(res.rows_affected())
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_ride(r: &sqlx::any::AnyRow) -> anyhow::Result<Ride> {
    let ride_id = parse_uuid(r.get::<String, _>("ride_id")).context("invalid ride_id")?;
    let rider_id = parse_uuid(r.get::<String, _>("rider_id")).context("invalid rider_id")?;
    let driver_id = match r.get::<Option<String>, _>("driver_id") {
        Some(s) => Some(parse_uuid(s).context("invalid driver_id")?),
        None => None,
    };
    let wallet_hold_id = match r.get::<Option<String>, _>("wallet_hold_id") {
        Some(s) => Some(parse_uuid(s).context("invalid wallet_hold_id")?),
        None => None,
    };

    let status = RideStatus::parse(&r.get::<String, _>("status"))?;

    let cancellation = match r.get::<Option<String>, _>("cancelled_by") {
        Some(by) => Some(Cancellation {
            by: CancelledBy::parse(&by)?,
            reason: r.get::<Option<String>, _>("cancel_reason").unwrap_or_default(),
        }),
        None => None,
    };

    Ok(Ride {
        ride_id,
        rider_id,
        driver_id,
        vehicle_class: r.get::<String, _>("vehicle_class"),
        status,
        pickup: Location {
            lat: r.get::<f64, _>("pickup_lat"),
            lon: r.get::<f64, _>("pickup_lon"),
            address: r.get::<String, _>("pickup_address"),
        },
        dropoff: Location {
            lat: r.get::<f64, _>("dropoff_lat"),
            lon: r.get::<f64, _>("dropoff_lon"),
            address: r.get::<String, _>("dropoff_address"),
        },
        estimate: RideEstimate {
            distance_km: r.get::<f64, _>("estimated_distance_km"),
            duration_secs: i64_to_u64(r.get("estimated_duration_secs"))?,
            fare: r.get::<f64, _>("estimated_fare"),
            surge_multiplier: r.get::<f64, _>("surge_multiplier"),
        },
        actuals: RideActuals {
            distance_km: r.get::<Option<f64>, _>("actual_distance_km"),
            duration_secs: opt_i64_to_u64(r.get("actual_duration_secs"))?,
            fare: r.get::<Option<f64>, _>("actual_fare"),
            driver_payout: r.get::<Option<f64>, _>("driver_payout"),
            rider_payable: r.get::<Option<f64>, _>("rider_payable"),
        },
        wallet_hold_id,
        rider_pin: r.get::<String, _>("rider_pin"),
        timestamps: RideTimestamps {
            requested_at_ms: i64_to_u64(r.get("requested_at_ms"))?,
            scheduled_at_ms: opt_i64_to_u64(r.get("scheduled_at_ms"))?,
            accepted_at_ms: opt_i64_to_u64(r.get("accepted_at_ms"))?,
            arrived_at_ms: opt_i64_to_u64(r.get("arrived_at_ms"))?,
            started_at_ms: opt_i64_to_u64(r.get("started_at_ms"))?,
            completed_at_ms: opt_i64_to_u64(r.get("completed_at_ms"))?,
            cancelled_at_ms: opt_i64_to_u64(r.get("cancelled_at_ms"))?,
        },
        cancellation,
    })
}

fn row_to_request(r: &sqlx::any::AnyRow) -> anyhow::Result<RideRequest> {
    Ok(RideRequest {
        request_id: parse_uuid(r.get::<String, _>("request_id")).context("invalid request_id")?,
        ride_id: parse_uuid(r.get::<String, _>("ride_id")).context("invalid ride_id")?,
        driver_id: parse_uuid(r.get::<String, _>("driver_id")).context("invalid driver_id")?,
        status: OfferStatus::parse(&r.get::<String, _>("status"))?,
        sent_at_ms: i64_to_u64(r.get("sent_at_ms"))?,
        expires_at_ms: i64_to_u64(r.get("expires_at_ms"))?,
        responded_at_ms: opt_i64_to_u64(r.get("responded_at_ms"))?,
    })
}

/// The timestamp column owned by a target status, if that status stamps one.
fn timestamp_column(to: RideStatus) -> Option<&'static str> {
    match to {
        RideStatus::Accepted => Some("accepted_at_ms"),
        RideStatus::Arrived => Some("arrived_at_ms"),
        RideStatus::Started => Some("started_at_ms"),
        RideStatus::Completed => Some("completed_at_ms"),
        RideStatus::Cancelled => Some("cancelled_at_ms"),
        RideStatus::Searching | RideStatus::Scheduled => None,
    }
}

/* =========================
Numeric safety helpers
========================= */

fn parse_uuid(s: String) -> anyhow::Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| anyhow!("bad uuid {s}: {e}"))
}

fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    if v < 0 {
        return Err(anyhow!("negative i64 where u64 expected: {v}"));
    }
    Ok(v as u64)
}

fn opt_i64_to_u64(v: Option<i64>) -> anyhow::Result<Option<u64>> {
    v.map(i64_to_u64).transpose()
}

fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    if v > i64::MAX as u64 {
        return Err(anyhow!("u64 too large for i64: {v}"));
    }
    Ok(v as i64)
}

fn opt_u64_to_i64(v: Option<u64>) -> anyhow::Result<Option<i64>> {
    v.map(u64_to_i64).transpose()
}
