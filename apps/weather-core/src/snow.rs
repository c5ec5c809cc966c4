//! Snowfall accumulation from ultrasonic distance data, plus the
//! background job that keeps the snow-totals cache warm. Ultrasonic gauges
//! are noisy; the dual-threshold algorithm separates real accumulation
//! from jitter and detects melt so totals stay monotonic.

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::CapabilitySet;
use crate::sinks::timescale::{BucketWidth, TimescaleReader};
use crate::store::{ConfigProvider, DeviceConfig, SnowTotals};

/// Cache refresh cadence.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Readers treat cache rows older than this as stale and recompute inline.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(45);

/// A single-bucket drop this large counts immediately.
pub const QUICK_THRESHOLD_MM: f64 = 20.0;

/// A cumulative drop from the baseline this large counts.
pub const GRADUAL_THRESHOLD_MM: f64 = 15.0;

/// A rise above the baseline this large resets it (melt or pad clearing).
pub const MELT_THRESHOLD_MM: f64 = 10.0;

/// Accumulated snowfall in millimeters over a series of bucketed distance
/// readings (sensor face to surface, oldest first).
///
/// A running baseline tracks the quiet surface. A bucket counts as
/// accumulation when it drops at least the quick threshold in one step, or
/// when the cumulative drop from the baseline reaches the gradual
/// threshold; either way the baseline moves down to the new surface so
/// later snow measures from there. A rise past the melt threshold resets
/// the baseline upward without negative accumulation.
pub fn snowfall_mm(distances: &[f64]) -> f64 {
    let mut iter = distances.iter().copied().filter(|d| d.is_finite() && *d > 0.0);
    let Some(first) = iter.next() else {
        return 0.0;
    };
    let mut baseline = first;
    let mut previous = first;
    let mut total = 0.0;

    for distance in iter {
        let step_drop = previous - distance;
        let cumulative_drop = baseline - distance;
        if step_drop >= QUICK_THRESHOLD_MM || cumulative_drop >= GRADUAL_THRESHOLD_MM {
            if cumulative_drop > 0.0 {
                total += cumulative_drop;
                baseline = distance;
            }
        } else if distance - baseline >= MELT_THRESHOLD_MM {
            baseline = distance;
        }
        previous = distance;
    }
    total
}

/// Derived depth for one raw distance against the configured empty-pad
/// distance. Clamped at zero.
pub fn snow_depth_mm(base_distance: f64, distance: f64) -> f64 {
    (base_distance - distance).max(0.0)
}

fn season_start(now: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
    // Snow season rolls over July 1 local time.
    let today = now.with_timezone(&Local).date_naive();
    let year = if today.month() >= 7 {
        today.year()
    } else {
        today.year() - 1
    };
    let date = NaiveDate::from_ymd_opt(year, 7, 1).expect("july 1 exists");
    Local
        .from_local_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight exists"))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Computes all four windows for one station with the same algorithm the
/// background job uses: the REST fallback path calls this directly when
/// the cache row is stale.
pub async fn compute_totals(
    reader: &TimescaleReader,
    station_name: &str,
) -> Result<SnowTotals> {
    let now = Utc::now();
    let midnight = crate::controllers::local_midnight();

    let buckets = reader
        .snow_distance_buckets(BucketWidth::FiveMinutes, station_name, midnight)
        .await
        .context("reading 5m snow buckets")?;
    let midnight_mm = snowfall_mm(&buckets);

    let last24 = reader
        .snow_distance_buckets(
            BucketWidth::OneHour,
            station_name,
            now - chrono::Duration::hours(24),
        )
        .await
        .context("reading 24h snow buckets")?;
    let last72 = reader
        .snow_distance_buckets(
            BucketWidth::OneHour,
            station_name,
            now - chrono::Duration::hours(72),
        )
        .await?;
    let season = reader
        .snow_distance_buckets(BucketWidth::OneHour, station_name, season_start(now))
        .await?;

    Ok(SnowTotals {
        station_name: station_name.to_string(),
        midnight_mm,
        last24_mm: snowfall_mm(&last24),
        last72_mm: snowfall_mm(&last72),
        season_mm: snowfall_mm(&season),
        computed_at: now,
    })
}

pub fn is_fresh(totals: &SnowTotals, now: chrono::DateTime<Utc>) -> bool {
    let age = now - totals.computed_at;
    age >= chrono::Duration::zero()
        && age < chrono::Duration::from_std(FRESHNESS_WINDOW).expect("window fits")
}

/// Background cache job. Every 30 s it recomputes totals for each
/// snow-capable station (a singleton in practice) and upserts the cache
/// row.
pub struct SnowCacheJob {
    provider: Arc<dyn ConfigProvider>,
    reader: Arc<RwLock<Option<TimescaleReader>>>,
}

impl SnowCacheJob {
    pub fn new(
        provider: Arc<dyn ConfigProvider>,
        reader: Arc<RwLock<Option<TimescaleReader>>>,
    ) -> SnowCacheJob {
        SnowCacheJob { provider, reader }
    }

    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.refresh_once().await {
                            tracing::warn!(error = %err, "snow cache refresh failed");
                        }
                    }
                }
            }
            tracing::debug!("snow cache job exited");
        })
    }

    async fn refresh_once(&self) -> Result<()> {
        let reader = { self.reader.read().await.clone() };
        let Some(reader) = reader else {
            return Ok(());
        };
        let devices = self.provider.get_devices().await?;
        for device in snow_stations(&devices) {
            let totals = compute_totals(&reader, &device.name).await?;
            self.provider.upsert_snow_totals(&totals).await?;
            tracing::debug!(
                station = %device.name,
                midnight = totals.midnight_mm,
                season = totals.season_mm,
                "snow totals cached"
            );
        }
        Ok(())
    }
}

pub fn snow_stations(devices: &[DeviceConfig]) -> impl Iterator<Item = &DeviceConfig> {
    devices
        .iter()
        .filter(|d| d.enabled && d.capabilities().contains(CapabilitySet::SNOW))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_sensor_accumulates_nothing() {
        // Jitter of a few millimeters never crosses either threshold.
        let distances = [500.0, 498.0, 501.0, 499.5, 500.5, 497.0];
        assert_eq!(snowfall_mm(&distances), 0.0);
    }

    #[test]
    fn sudden_drop_counts_via_quick_threshold() {
        let distances = [500.0, 475.0, 474.0];
        let total = snowfall_mm(&distances);
        assert!((total - 25.0).abs() < 1e-9, "got {total}");
    }

    #[test]
    fn slow_steady_snowfall_counts_via_gradual_threshold() {
        // 4 mm per bucket: no single bucket crosses quick, but the
        // cumulative drop from baseline keeps crossing gradual.
        let distances: Vec<f64> = (0..11).map(|i| 500.0 - 4.0 * i as f64).collect();
        let total = snowfall_mm(&distances);
        assert!(total >= 32.0, "got {total}");
        assert!(total <= 40.0, "got {total}");
    }

    #[test]
    fn melt_resets_baseline_without_negative_totals() {
        // Snow falls, then melts away, then falls again.
        let distances = [500.0, 470.0, 470.0, 495.0, 495.0, 465.0];
        let total = snowfall_mm(&distances);
        assert!((total - 60.0).abs() < 1e-9, "got {total}");
    }

    #[test]
    fn zero_and_bogus_readings_are_ignored() {
        assert_eq!(snowfall_mm(&[]), 0.0);
        assert_eq!(snowfall_mm(&[0.0, 0.0]), 0.0);
        let with_dropouts = [500.0, 0.0, 475.0, f64::NAN, 474.0];
        let total = snowfall_mm(&with_dropouts);
        assert!((total - 25.0).abs() < 1e-9, "got {total}");
    }

    #[test]
    fn windows_are_monotonic_when_computed_consistently() {
        // The same series truncated to nested suffixes: a longer window
        // can only see more accumulation.
        let season: Vec<f64> = vec![
            520.0, 515.0, 490.0, 489.0, 470.0, 468.0, 466.0, 440.0, 438.0, 437.0,
        ];
        let h72 = &season[4..];
        let h24 = &season[7..];
        let s = snowfall_mm(&season);
        let a = snowfall_mm(h72);
        let b = snowfall_mm(h24);
        assert!(s >= a, "season {s} >= 72h {a}");
        assert!(a >= b, "72h {a} >= 24h {b}");
        assert!(b >= 0.0);
    }

    #[test]
    fn depth_clamps_at_zero() {
        assert_eq!(snow_depth_mm(500.0, 450.0), 50.0);
        assert_eq!(snow_depth_mm(500.0, 520.0), 0.0);
    }

    #[test]
    fn freshness_window_is_45_seconds() {
        let now = Utc::now();
        let fresh = SnowTotals {
            station_name: "gauge".to_string(),
            midnight_mm: 0.0,
            last24_mm: 0.0,
            last72_mm: 0.0,
            season_mm: 0.0,
            computed_at: now - chrono::Duration::seconds(30),
        };
        assert!(is_fresh(&fresh, now));
        let stale = SnowTotals {
            computed_at: now - chrono::Duration::seconds(46),
            ..fresh
        };
        assert!(!is_fresh(&stale, now));
    }

    #[test]
    fn season_rolls_over_in_july() {
        let winter = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let start = season_start(winter);
        assert_eq!(start.with_timezone(&Local).date_naive().month(), 7);
        assert_eq!(start.with_timezone(&Local).date_naive().year(), 2023);

        let autumn = Utc.with_ymd_and_hms(2024, 10, 15, 12, 0, 0).unwrap();
        let start = season_start(autumn);
        assert_eq!(start.with_timezone(&Local).date_naive().year(), 2024);
    }
}
