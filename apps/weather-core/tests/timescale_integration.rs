//! TimescaleDB-backed end-to-end checks. These only run against a real
//! database:
//!
//!   WEATHER_INTEGRATION_TEST=1 \
//!   WEATHER_TEST_DATABASE_URL=postgres://... cargo test

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::postgres::PgPoolOptions;
use std::env;

use weather_core::model::Reading;
use weather_core::sinks::timescale::{ensure_schema, insert_reading, TimescaleReader};

fn test_dsn() -> Option<String> {
    if env::var("WEATHER_INTEGRATION_TEST").ok().as_deref() != Some("1") {
        return None;
    }
    env::var("WEATHER_TEST_DATABASE_URL").ok()
}

#[tokio::test]
async fn davis_steady_state_rows_round_trip() -> anyhow::Result<()> {
    let Some(dsn) = test_dsn() else {
        return Ok(());
    };
    let pool = PgPoolOptions::new().max_connections(5).connect(&dsn).await?;
    ensure_schema(&pool).await?;

    let station = format!("it_davis_{}", std::process::id());
    let start = Utc::now() - ChronoDuration::seconds(60);
    for n in 0..30 {
        let mut reading = Reading::new(&station, "davis");
        reading.time = start + ChronoDuration::seconds(2 * n);
        reading.out_temp = 72.0;
        reading.barometer = 29.912;
        reading.wind_speed = 5.0;
        reading.wind_dir = 270.0;
        reading.rain_incremental = 0.01;
        insert_reading(&pool, &reading).await?;
    }

    let reader = TimescaleReader::new(pool.clone());
    reader.ping().await?;

    let latest = reader.get_latest(&station).await?.expect("row stored");
    assert_eq!(latest.out_temp, 72.0);
    assert_eq!(latest.barometer, 29.912);
    assert_eq!(latest.wind_speed, 5.0);
    assert_eq!(latest.wind_dir, 270.0);

    let span = reader.get_span(&station, 1).await?;
    assert_eq!(span.len(), 30);
    assert!(span.windows(2).all(|w| w[0].time <= w[1].time));

    let rainfall = reader.rainfall_since(&station, start).await?;
    assert!((rainfall - 0.30).abs() < 1e-9, "got {rainfall}");

    sqlx::query("DELETE FROM weather WHERE station_name = $1")
        .bind(&station)
        .execute(&pool)
        .await?;
    Ok(())
}

#[tokio::test]
async fn circular_aggregate_prefers_no_bearing_for_uniform_wind() -> anyhow::Result<()> {
    let Some(dsn) = test_dsn() else {
        return Ok(());
    };
    let pool = PgPoolOptions::new().max_connections(5).connect(&dsn).await?;
    ensure_schema(&pool).await?;

    let station = format!("it_wind_{}", std::process::id());
    let start = Utc::now() - ChronoDuration::seconds(360);
    for n in 0..360 {
        let mut reading = Reading::new(&station, "davis");
        reading.time = start + ChronoDuration::milliseconds(500 * n);
        reading.wind_dir = (n % 360) as f64;
        insert_reading(&pool, &reading).await?;
    }

    // Degenerate case: identical bearings aggregate to that bearing.
    let bearing: f64 = sqlx::query_scalar(
        "SELECT circular_avg(wind_dir) FROM weather WHERE station_name = $1 AND wind_dir = 270",
    )
    .bind(&station)
    .fetch_one(&pool)
    .await?;
    assert!((bearing - 270.0).abs() < 1e-6, "got {bearing}");

    // Uniform distribution: the resultant has no preferred bearing, which
    // shows up as a near-zero resultant; any angle is acceptable but the
    // computation must not error or return NaN.
    let uniform: f64 = sqlx::query_scalar(
        "SELECT circular_avg(wind_dir) FROM weather WHERE station_name = $1",
    )
    .bind(&station)
    .fetch_one(&pool)
    .await?;
    assert!(uniform.is_finite());
    assert!((0.0..360.0).contains(&uniform));

    // North wraparound: 350 and 10 average to 0, not 180.
    let wrap: f64 = sqlx::query_scalar(
        "SELECT circular_avg(wind_dir) FROM weather \
         WHERE station_name = $1 AND (wind_dir = 350 OR wind_dir = 10)",
    )
    .bind(&station)
    .fetch_one(&pool)
    .await?;
    assert!(wrap < 1.0 || wrap > 359.0, "got {wrap}");

    sqlx::query("DELETE FROM weather WHERE station_name = $1")
        .bind(&station)
        .execute(&pool)
        .await?;
    Ok(())
}
