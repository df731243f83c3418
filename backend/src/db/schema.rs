use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Rides
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS rides (
  ride_id TEXT PRIMARY KEY,
  rider_id TEXT NOT NULL,
  driver_id TEXT,
  vehicle_class TEXT NOT NULL,
  status TEXT NOT NULL,

  pickup_lat DOUBLE PRECISION NOT NULL,
  pickup_lon DOUBLE PRECISION NOT NULL,
  pickup_address TEXT NOT NULL,
  dropoff_lat DOUBLE PRECISION NOT NULL,
  dropoff_lon DOUBLE PRECISION NOT NULL,
  dropoff_address TEXT NOT NULL,

  estimated_distance_km DOUBLE PRECISION NOT NULL,
  estimated_duration_secs BIGINT NOT NULL,
  estimated_fare DOUBLE PRECISION NOT NULL,
  surge_multiplier DOUBLE PRECISION NOT NULL,

  actual_distance_km DOUBLE PRECISION,
  actual_duration_secs BIGINT,
  actual_fare DOUBLE PRECISION,
  driver_payout DOUBLE PRECISION,
  rider_payable DOUBLE PRECISION,

  wallet_hold_id TEXT,
  rider_pin TEXT NOT NULL,

  scheduled_at_ms BIGINT,
  requested_at_ms BIGINT NOT NULL,
  accepted_at_ms BIGINT,
  arrived_at_ms BIGINT,
  started_at_ms BIGINT,
  completed_at_ms BIGINT,
  cancelled_at_ms BIGINT,

  cancelled_by TEXT,
  cancel_reason TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    // Ride requests (offers)
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS ride_requests (
  request_id TEXT PRIMARY KEY,
  ride_id TEXT NOT NULL,
  driver_id TEXT NOT NULL,
  status TEXT NOT NULL,
  sent_at_ms BIGINT NOT NULL,
  expires_at_ms BIGINT NOT NULL,
  responded_at_ms BIGINT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_rides_rider ON rides(rider_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_rides_driver ON rides(driver_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_rides_status ON rides(status);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_ride_requests_ride ON ride_requests(ride_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_ride_requests_status ON ride_requests(status, expires_at_ms);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
