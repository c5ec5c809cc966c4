//! TimescaleDB sink. Owns the wide `weather` hypertable, the circular
//! wind-direction aggregate, four continuous aggregates with retention and
//! refresh policies, and a row-at-a-time writer. Read paths (latest, span,
//! rainfall, snow buckets) hang off a cloneable [`TimescaleReader`] shared
//! with the REST layer, upload controllers, and the snow cache job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::SINK_INBOX_CAPACITY;
use crate::model::Reading;
use crate::solar;
use crate::store::{ConfigProvider, SinkHealth, SunTimes};

use super::health::spawn_health_ticker;
use super::{join_writer, StorageBackend};

/// Every column of the wide table, in insert order.
const COLUMNS: [&str; 100] = [
    "time",
    "station_name",
    "station_type",
    "station_id",
    "barometer",
    "in_temp",
    "in_humidity",
    "out_temp",
    "out_humidity",
    "wind_speed",
    "wind_speed10",
    "wind_dir",
    "wind_chill",
    "heat_index",
    "extra_temp1",
    "extra_temp2",
    "extra_temp3",
    "extra_temp4",
    "extra_temp5",
    "extra_temp6",
    "extra_temp7",
    "soil_temp1",
    "soil_temp2",
    "soil_temp3",
    "soil_temp4",
    "leaf_temp1",
    "leaf_temp2",
    "leaf_temp3",
    "leaf_temp4",
    "extra_humidity1",
    "extra_humidity2",
    "extra_humidity3",
    "extra_humidity4",
    "extra_humidity5",
    "extra_humidity6",
    "extra_humidity7",
    "soil_moisture1",
    "soil_moisture2",
    "soil_moisture3",
    "soil_moisture4",
    "leaf_wetness1",
    "leaf_wetness2",
    "leaf_wetness3",
    "leaf_wetness4",
    "rain_rate",
    "rain_incremental",
    "storm_rain",
    "storm_start",
    "day_rain",
    "month_rain",
    "year_rain",
    "uv",
    "radiation",
    "solar_watts",
    "potential_solar_watts",
    "snow_distance",
    "snow_depth",
    "tx_battery_status",
    "cons_battery_voltage",
    "station_battery_voltage",
    "forecast_icon",
    "forecast_rule",
    "sunrise",
    "sunset",
    "inside_alarm",
    "rain_alarm",
    "outside_alarm1",
    "outside_alarm2",
    "extra_alarm1",
    "extra_alarm2",
    "extra_alarm3",
    "extra_alarm4",
    "extra_alarm5",
    "extra_alarm6",
    "extra_alarm7",
    "extra_alarm8",
    "soil_leaf_alarm1",
    "soil_leaf_alarm2",
    "soil_leaf_alarm3",
    "soil_leaf_alarm4",
    "extra_float1",
    "extra_float2",
    "extra_float3",
    "extra_float4",
    "extra_float5",
    "extra_float6",
    "extra_float7",
    "extra_float8",
    "extra_float9",
    "extra_float10",
    "extra_text1",
    "extra_text2",
    "extra_text3",
    "extra_text4",
    "extra_text5",
    "extra_text6",
    "extra_text7",
    "extra_text8",
    "extra_text9",
    "extra_text10",
];

/// Measurement columns aggregated with avg/min/max in every continuous
/// aggregate. Wind direction is handled separately with the circular mean.
const MEASUREMENT_COLUMNS: [&str; 63] = [
    "barometer",
    "in_temp",
    "in_humidity",
    "out_temp",
    "out_humidity",
    "wind_speed",
    "wind_speed10",
    "wind_chill",
    "heat_index",
    "extra_temp1",
    "extra_temp2",
    "extra_temp3",
    "extra_temp4",
    "extra_temp5",
    "extra_temp6",
    "extra_temp7",
    "soil_temp1",
    "soil_temp2",
    "soil_temp3",
    "soil_temp4",
    "leaf_temp1",
    "leaf_temp2",
    "leaf_temp3",
    "leaf_temp4",
    "extra_humidity1",
    "extra_humidity2",
    "extra_humidity3",
    "extra_humidity4",
    "extra_humidity5",
    "extra_humidity6",
    "extra_humidity7",
    "soil_moisture1",
    "soil_moisture2",
    "soil_moisture3",
    "soil_moisture4",
    "leaf_wetness1",
    "leaf_wetness2",
    "leaf_wetness3",
    "leaf_wetness4",
    "rain_rate",
    "rain_incremental",
    "storm_rain",
    "day_rain",
    "month_rain",
    "year_rain",
    "uv",
    "radiation",
    "solar_watts",
    "potential_solar_watts",
    "snow_distance",
    "snow_depth",
    "cons_battery_voltage",
    "station_battery_voltage",
    "extra_float1",
    "extra_float2",
    "extra_float3",
    "extra_float4",
    "extra_float5",
    "extra_float6",
    "extra_float7",
    "extra_float8",
    "extra_float9",
    "extra_float10",
];

/// (view, bucket width, raw retention, refresh cadence).
const AGGREGATES: [(&str, &str, &str, &str); 4] = [
    ("weather_1m", "1 minute", "1 month", "1 minute"),
    ("weather_5m", "5 minutes", "6 months", "5 minutes"),
    ("weather_1h", "1 hour", "2 years", "1 hour"),
    ("weather_1d", "1 day", "10 years", "1 day"),
];

const RAW_RETENTION: &str = "365 days";

fn create_table_sql() -> String {
    let mut columns = vec![
        "time TIMESTAMPTZ NOT NULL".to_string(),
        "station_name TEXT NOT NULL".to_string(),
        "station_type TEXT NOT NULL DEFAULT ''".to_string(),
        "station_id UUID".to_string(),
    ];
    for column in &COLUMNS[4..] {
        let definition = match *column {
            "storm_start" | "sunrise" | "sunset" => format!("{column} TIMESTAMPTZ"),
            "tx_battery_status" | "forecast_icon" | "forecast_rule" => {
                format!("{column} SMALLINT NOT NULL DEFAULT 0")
            }
            c if c.contains("alarm") => format!("{column} SMALLINT NOT NULL DEFAULT 0"),
            c if c.starts_with("extra_text") => {
                format!("{column} TEXT NOT NULL DEFAULT ''")
            }
            _ => format!("{column} DOUBLE PRECISION NOT NULL DEFAULT 0"),
        };
        columns.push(definition);
    }
    format!(
        "CREATE TABLE IF NOT EXISTS weather (\n    {}\n)",
        columns.join(",\n    ")
    )
}

/// The circular mean aggregate: atan2 of summed sines and cosines,
/// normalized to [0, 360). Must exist before any aggregate referencing it.
const CIRCULAR_AVG_SQL: &str = r#"
DO $$
BEGIN
    CREATE FUNCTION circular_avg_accum(state double precision[], value double precision)
    RETURNS double precision[]
    LANGUAGE sql IMMUTABLE STRICT AS
    'SELECT ARRAY[state[1] + sin(radians(value)), state[2] + cos(radians(value))]';

    CREATE FUNCTION circular_avg_final(state double precision[])
    RETURNS double precision
    LANGUAGE sql IMMUTABLE STRICT AS
    'SELECT CASE
        WHEN state[1] = 0 AND state[2] = 0 THEN 0
        ELSE mod(CAST(degrees(atan2(state[1], state[2])) + 360 AS numeric), 360)::double precision
    END';

    CREATE AGGREGATE circular_avg(double precision) (
        SFUNC = circular_avg_accum,
        STYPE = double precision[],
        FINALFUNC = circular_avg_final,
        INITCOND = '{0,0}'
    );
EXCEPTION
    WHEN duplicate_function THEN NULL;
END
$$;
"#;

fn continuous_aggregate_sql(view: &str, bucket: &str) -> String {
    let mut selects = Vec::new();
    for column in MEASUREMENT_COLUMNS {
        selects.push(format!(
            "avg({column}) AS avg_{column}, min({column}) AS min_{column}, max({column}) AS max_{column}"
        ));
    }
    format!(
        "CREATE MATERIALIZED VIEW IF NOT EXISTS {view}\n\
         WITH (timescaledb.continuous) AS\n\
         SELECT time_bucket(INTERVAL '{bucket}', time) AS bucket,\n\
                station_name,\n\
                circular_avg(wind_dir) AS avg_wind_dir,\n\
                {}\n\
         FROM weather\n\
         GROUP BY bucket, station_name\n\
         WITH NO DATA",
        selects.join(",\n                ")
    )
}

fn insert_sql() -> String {
    let placeholders: Vec<String> = (1..=COLUMNS.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO weather ({}) VALUES ({})",
        COLUMNS.join(", "),
        placeholders.join(", ")
    )
}

/// Brings the schema up. Materialized views and policies cannot run inside
/// a transaction, so every statement executes in autocommit, in dependency
/// order: table, hypertable, aggregate function, views, policies.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(&create_table_sql())
        .execute(pool)
        .await
        .context("creating weather table")?;
    sqlx::query("SELECT create_hypertable('weather', 'time', if_not_exists => TRUE)")
        .execute(pool)
        .await
        .context("creating hypertable")?;
    sqlx::query(CIRCULAR_AVG_SQL)
        .execute(pool)
        .await
        .context("creating circular_avg aggregate")?;

    for (view, bucket, _, _) in AGGREGATES {
        sqlx::query(&continuous_aggregate_sql(view, bucket))
            .execute(pool)
            .await
            .with_context(|| format!("creating continuous aggregate {view}"))?;
    }

    sqlx::query(&format!(
        "SELECT add_retention_policy('weather', INTERVAL '{RAW_RETENTION}', if_not_exists => TRUE)"
    ))
    .execute(pool)
    .await
    .context("adding raw retention policy")?;

    for (view, bucket, retention, refresh) in AGGREGATES {
        sqlx::query(&format!(
            "SELECT add_retention_policy('{view}', INTERVAL '{retention}', if_not_exists => TRUE)"
        ))
        .execute(pool)
        .await
        .with_context(|| format!("adding retention policy for {view}"))?;
        sqlx::query(&format!(
            "SELECT add_continuous_aggregate_policy('{view}', \
             start_offset => INTERVAL '1 day', \
             end_offset => INTERVAL '{bucket}', \
             schedule_interval => INTERVAL '{refresh}', \
             if_not_exists => TRUE)"
        ))
        .execute(pool)
        .await
        .with_context(|| format!("adding refresh policy for {view}"))?;
    }
    Ok(())
}

pub async fn insert_reading(pool: &PgPool, reading: &Reading) -> Result<()> {
    sqlx::query(&insert_sql())
        .bind(reading.time)
        .bind(&reading.station_name)
        .bind(&reading.station_type)
        .bind(reading.station_id)
        .bind(reading.barometer)
        .bind(reading.in_temp)
        .bind(reading.in_humidity)
        .bind(reading.out_temp)
        .bind(reading.out_humidity)
        .bind(reading.wind_speed)
        .bind(reading.wind_speed10)
        .bind(reading.wind_dir)
        .bind(reading.wind_chill)
        .bind(reading.heat_index)
        .bind(reading.extra_temp1)
        .bind(reading.extra_temp2)
        .bind(reading.extra_temp3)
        .bind(reading.extra_temp4)
        .bind(reading.extra_temp5)
        .bind(reading.extra_temp6)
        .bind(reading.extra_temp7)
        .bind(reading.soil_temp1)
        .bind(reading.soil_temp2)
        .bind(reading.soil_temp3)
        .bind(reading.soil_temp4)
        .bind(reading.leaf_temp1)
        .bind(reading.leaf_temp2)
        .bind(reading.leaf_temp3)
        .bind(reading.leaf_temp4)
        .bind(reading.extra_humidity1)
        .bind(reading.extra_humidity2)
        .bind(reading.extra_humidity3)
        .bind(reading.extra_humidity4)
        .bind(reading.extra_humidity5)
        .bind(reading.extra_humidity6)
        .bind(reading.extra_humidity7)
        .bind(reading.soil_moisture1)
        .bind(reading.soil_moisture2)
        .bind(reading.soil_moisture3)
        .bind(reading.soil_moisture4)
        .bind(reading.leaf_wetness1)
        .bind(reading.leaf_wetness2)
        .bind(reading.leaf_wetness3)
        .bind(reading.leaf_wetness4)
        .bind(reading.rain_rate)
        .bind(reading.rain_incremental)
        .bind(reading.storm_rain)
        .bind(reading.storm_start)
        .bind(reading.day_rain)
        .bind(reading.month_rain)
        .bind(reading.year_rain)
        .bind(reading.uv)
        .bind(reading.radiation)
        .bind(reading.solar_watts)
        .bind(reading.potential_solar_watts)
        .bind(reading.snow_distance)
        .bind(reading.snow_depth)
        .bind(reading.tx_battery_status as i16)
        .bind(reading.cons_battery_voltage)
        .bind(reading.station_battery_voltage)
        .bind(reading.forecast_icon as i16)
        .bind(reading.forecast_rule as i16)
        .bind(reading.sunrise)
        .bind(reading.sunset)
        .bind(reading.inside_alarm as i16)
        .bind(reading.rain_alarm as i16)
        .bind(reading.outside_alarm1 as i16)
        .bind(reading.outside_alarm2 as i16)
        .bind(reading.extra_alarm1 as i16)
        .bind(reading.extra_alarm2 as i16)
        .bind(reading.extra_alarm3 as i16)
        .bind(reading.extra_alarm4 as i16)
        .bind(reading.extra_alarm5 as i16)
        .bind(reading.extra_alarm6 as i16)
        .bind(reading.extra_alarm7 as i16)
        .bind(reading.extra_alarm8 as i16)
        .bind(reading.soil_leaf_alarm1 as i16)
        .bind(reading.soil_leaf_alarm2 as i16)
        .bind(reading.soil_leaf_alarm3 as i16)
        .bind(reading.soil_leaf_alarm4 as i16)
        .bind(reading.extra_float1)
        .bind(reading.extra_float2)
        .bind(reading.extra_float3)
        .bind(reading.extra_float4)
        .bind(reading.extra_float5)
        .bind(reading.extra_float6)
        .bind(reading.extra_float7)
        .bind(reading.extra_float8)
        .bind(reading.extra_float9)
        .bind(reading.extra_float10)
        .bind(&reading.extra_text1)
        .bind(&reading.extra_text2)
        .bind(&reading.extra_text3)
        .bind(&reading.extra_text4)
        .bind(&reading.extra_text5)
        .bind(&reading.extra_text6)
        .bind(&reading.extra_text7)
        .bind(&reading.extra_text8)
        .bind(&reading.extra_text9)
        .bind(&reading.extra_text10)
        .execute(pool)
        .await?;
    Ok(())
}

fn reading_from_row(row: &PgRow) -> Result<Reading, sqlx::Error> {
    let mut reading = Reading::new(
        row.try_get::<String, _>("station_name")?,
        row.try_get::<String, _>("station_type")?,
    );
    reading.time = row.try_get("time")?;
    reading.station_id = row.try_get::<Option<Uuid>, _>("station_id")?;
    reading.barometer = row.try_get("barometer")?;
    reading.in_temp = row.try_get("in_temp")?;
    reading.in_humidity = row.try_get("in_humidity")?;
    reading.out_temp = row.try_get("out_temp")?;
    reading.out_humidity = row.try_get("out_humidity")?;
    reading.wind_speed = row.try_get("wind_speed")?;
    reading.wind_speed10 = row.try_get("wind_speed10")?;
    reading.wind_dir = row.try_get("wind_dir")?;
    reading.wind_chill = row.try_get("wind_chill")?;
    reading.heat_index = row.try_get("heat_index")?;
    reading.extra_temp1 = row.try_get("extra_temp1")?;
    reading.extra_temp2 = row.try_get("extra_temp2")?;
    reading.extra_temp3 = row.try_get("extra_temp3")?;
    reading.extra_temp4 = row.try_get("extra_temp4")?;
    reading.extra_temp5 = row.try_get("extra_temp5")?;
    reading.extra_temp6 = row.try_get("extra_temp6")?;
    reading.extra_temp7 = row.try_get("extra_temp7")?;
    reading.soil_temp1 = row.try_get("soil_temp1")?;
    reading.soil_temp2 = row.try_get("soil_temp2")?;
    reading.soil_temp3 = row.try_get("soil_temp3")?;
    reading.soil_temp4 = row.try_get("soil_temp4")?;
    reading.leaf_temp1 = row.try_get("leaf_temp1")?;
    reading.leaf_temp2 = row.try_get("leaf_temp2")?;
    reading.leaf_temp3 = row.try_get("leaf_temp3")?;
    reading.leaf_temp4 = row.try_get("leaf_temp4")?;
    reading.extra_humidity1 = row.try_get("extra_humidity1")?;
    reading.extra_humidity2 = row.try_get("extra_humidity2")?;
    reading.extra_humidity3 = row.try_get("extra_humidity3")?;
    reading.extra_humidity4 = row.try_get("extra_humidity4")?;
    reading.extra_humidity5 = row.try_get("extra_humidity5")?;
    reading.extra_humidity6 = row.try_get("extra_humidity6")?;
    reading.extra_humidity7 = row.try_get("extra_humidity7")?;
    reading.soil_moisture1 = row.try_get("soil_moisture1")?;
    reading.soil_moisture2 = row.try_get("soil_moisture2")?;
    reading.soil_moisture3 = row.try_get("soil_moisture3")?;
    reading.soil_moisture4 = row.try_get("soil_moisture4")?;
    reading.leaf_wetness1 = row.try_get("leaf_wetness1")?;
    reading.leaf_wetness2 = row.try_get("leaf_wetness2")?;
    reading.leaf_wetness3 = row.try_get("leaf_wetness3")?;
    reading.leaf_wetness4 = row.try_get("leaf_wetness4")?;
    reading.rain_rate = row.try_get("rain_rate")?;
    reading.rain_incremental = row.try_get("rain_incremental")?;
    reading.storm_rain = row.try_get("storm_rain")?;
    reading.storm_start = row.try_get("storm_start")?;
    reading.day_rain = row.try_get("day_rain")?;
    reading.month_rain = row.try_get("month_rain")?;
    reading.year_rain = row.try_get("year_rain")?;
    reading.uv = row.try_get("uv")?;
    reading.radiation = row.try_get("radiation")?;
    reading.solar_watts = row.try_get("solar_watts")?;
    reading.potential_solar_watts = row.try_get("potential_solar_watts")?;
    reading.snow_distance = row.try_get("snow_distance")?;
    reading.snow_depth = row.try_get("snow_depth")?;
    reading.tx_battery_status = row.try_get::<i16, _>("tx_battery_status")? as u8;
    reading.cons_battery_voltage = row.try_get("cons_battery_voltage")?;
    reading.station_battery_voltage = row.try_get("station_battery_voltage")?;
    reading.forecast_icon = row.try_get::<i16, _>("forecast_icon")? as u8;
    reading.forecast_rule = row.try_get::<i16, _>("forecast_rule")? as u8;
    reading.sunrise = row.try_get("sunrise")?;
    reading.sunset = row.try_get("sunset")?;
    reading.inside_alarm = row.try_get::<i16, _>("inside_alarm")? as u8;
    reading.rain_alarm = row.try_get::<i16, _>("rain_alarm")? as u8;
    reading.outside_alarm1 = row.try_get::<i16, _>("outside_alarm1")? as u8;
    reading.outside_alarm2 = row.try_get::<i16, _>("outside_alarm2")? as u8;
    reading.extra_alarm1 = row.try_get::<i16, _>("extra_alarm1")? as u8;
    reading.extra_alarm2 = row.try_get::<i16, _>("extra_alarm2")? as u8;
    reading.extra_alarm3 = row.try_get::<i16, _>("extra_alarm3")? as u8;
    reading.extra_alarm4 = row.try_get::<i16, _>("extra_alarm4")? as u8;
    reading.extra_alarm5 = row.try_get::<i16, _>("extra_alarm5")? as u8;
    reading.extra_alarm6 = row.try_get::<i16, _>("extra_alarm6")? as u8;
    reading.extra_alarm7 = row.try_get::<i16, _>("extra_alarm7")? as u8;
    reading.extra_alarm8 = row.try_get::<i16, _>("extra_alarm8")? as u8;
    reading.soil_leaf_alarm1 = row.try_get::<i16, _>("soil_leaf_alarm1")? as u8;
    reading.soil_leaf_alarm2 = row.try_get::<i16, _>("soil_leaf_alarm2")? as u8;
    reading.soil_leaf_alarm3 = row.try_get::<i16, _>("soil_leaf_alarm3")? as u8;
    reading.soil_leaf_alarm4 = row.try_get::<i16, _>("soil_leaf_alarm4")? as u8;
    reading.extra_float1 = row.try_get("extra_float1")?;
    reading.extra_float2 = row.try_get("extra_float2")?;
    reading.extra_float3 = row.try_get("extra_float3")?;
    reading.extra_float4 = row.try_get("extra_float4")?;
    reading.extra_float5 = row.try_get("extra_float5")?;
    reading.extra_float6 = row.try_get("extra_float6")?;
    reading.extra_float7 = row.try_get("extra_float7")?;
    reading.extra_float8 = row.try_get("extra_float8")?;
    reading.extra_float9 = row.try_get("extra_float9")?;
    reading.extra_float10 = row.try_get("extra_float10")?;
    reading.extra_text1 = row.try_get("extra_text1")?;
    reading.extra_text2 = row.try_get("extra_text2")?;
    reading.extra_text3 = row.try_get("extra_text3")?;
    reading.extra_text4 = row.try_get("extra_text4")?;
    reading.extra_text5 = row.try_get("extra_text5")?;
    reading.extra_text6 = row.try_get("extra_text6")?;
    reading.extra_text7 = row.try_get("extra_text7")?;
    reading.extra_text8 = row.try_get("extra_text8")?;
    reading.extra_text9 = row.try_get("extra_text9")?;
    reading.extra_text10 = row.try_get("extra_text10")?;
    Ok(reading)
}

/// Which continuous aggregate a bucketed read runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketWidth {
    FiveMinutes,
    OneHour,
}

impl BucketWidth {
    fn view(self) -> &'static str {
        match self {
            BucketWidth::FiveMinutes => "weather_5m",
            BucketWidth::OneHour => "weather_1h",
        }
    }
}

/// Cloneable read handle over the weather hypertable and its aggregates.
#[derive(Clone)]
pub struct TimescaleReader {
    pool: PgPool,
}

impl TimescaleReader {
    pub fn new(pool: PgPool) -> TimescaleReader {
        TimescaleReader { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_latest(&self, station_name: &str) -> Result<Option<Reading>> {
        let row = sqlx::query(
            "SELECT * FROM weather WHERE station_name = $1 ORDER BY time DESC LIMIT 1",
        )
        .bind(station_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(reading_from_row).transpose().map_err(Into::into)
    }

    pub async fn get_span(&self, station_name: &str, hours: i64) -> Result<Vec<Reading>> {
        let rows = sqlx::query(
            "SELECT * FROM weather \
             WHERE station_name = $1 AND time > now() - make_interval(hours => $2::int) \
             ORDER BY time ASC",
        )
        .bind(station_name)
        .bind(hours)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(reading_from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    /// Total rainfall accumulated from per-packet increments since the
    /// given instant. The capability gate lives with the callers: snow- or
    /// air-quality-only stations never reach this query.
    pub async fn rainfall_since(
        &self,
        station_name: &str,
        since: DateTime<Utc>,
    ) -> Result<f64> {
        let total: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(rain_incremental) FROM weather \
             WHERE station_name = $1 AND time >= $2",
        )
        .bind(station_name)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0.0))
    }

    /// Average snow distance per bucket since the given instant, oldest
    /// first, from the 5-minute or 1-hour aggregate.
    pub async fn snow_distance_buckets(
        &self,
        width: BucketWidth,
        station_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<f64>> {
        let sql = format!(
            "SELECT avg_snow_distance FROM {} \
             WHERE station_name = $1 AND bucket >= $2 \
             ORDER BY bucket ASC",
            width.view()
        );
        let buckets: Vec<Option<f64>> = sqlx::query_scalar(&sql)
            .bind(station_name)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(buckets.into_iter().flatten().collect())
    }
}

/// Stations whose protocol carries no almanac (everything except the Davis
/// console) get sunrise/sunset filled from the `sun_times` cache, computed
/// once per site and day from the device's coordinates.
async fn fill_sun_times(provider: &Arc<dyn ConfigProvider>, reading: &mut Reading) {
    if reading.sunrise.is_some() && reading.sunset.is_some() {
        return;
    }
    let device = match provider.get_devices().await {
        Ok(devices) => devices.into_iter().find(|d| d.name == reading.station_name),
        Err(err) => {
            tracing::debug!(error = %err, "device lookup failed, leaving almanac empty");
            return;
        }
    };
    let Some(device) = device else {
        return;
    };
    if device.latitude == 0.0 && device.longitude == 0.0 {
        return;
    }

    let day = reading.time.date_naive();
    let cached = provider
        .get_sun_times(device.latitude, device.longitude, day)
        .await
        .ok()
        .flatten();
    let times = match cached {
        Some(times) => times,
        None => {
            let Some((sunrise, sunset)) =
                solar::sun_times(device.latitude, device.longitude, day)
            else {
                // Polar day or night: nothing sensible to record.
                return;
            };
            let times = SunTimes {
                latitude: device.latitude,
                longitude: device.longitude,
                day,
                sunrise,
                sunset,
            };
            if let Err(err) = provider.upsert_sun_times(&times).await {
                tracing::debug!(error = %err, "sun times cache write failed");
            }
            times
        }
    };
    reading.sunrise = Some(times.sunrise);
    reading.sunset = Some(times.sunset);
}

pub struct TimescaleSink {
    name: String,
    dsn: String,
    provider: Arc<dyn ConfigProvider>,
    reader: Arc<tokio::sync::RwLock<Option<TimescaleReader>>>,
    cancel: Option<CancellationToken>,
    writer: Option<JoinHandle<()>>,
    health_ticker: Option<JoinHandle<()>>,
}

impl TimescaleSink {
    pub fn new(
        name: impl Into<String>,
        dsn: impl Into<String>,
        provider: Arc<dyn ConfigProvider>,
        reader: Arc<tokio::sync::RwLock<Option<TimescaleReader>>>,
    ) -> TimescaleSink {
        TimescaleSink {
            name: name.into(),
            dsn: dsn.into(),
            provider,
            reader,
            cancel: None,
            writer: None,
            health_ticker: None,
        }
    }
}

#[async_trait]
impl StorageBackend for TimescaleSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(
        &mut self,
        cancel: CancellationToken,
    ) -> anyhow::Result<mpsc::Sender<Reading>> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&self.dsn)
            .await
            .context("connecting to timescaledb")?;
        ensure_schema(&pool).await?;

        let reader = TimescaleReader::new(pool.clone());
        *self.reader.write().await = Some(reader.clone());

        let (tx, mut rx) = mpsc::channel::<Reading>(SINK_INBOX_CAPACITY);
        let name = self.name.clone();
        let writer_provider = self.provider.clone();
        let writer_cancel = cancel.clone();
        self.writer = Some(tokio::spawn(async move {
            loop {
                let mut reading = tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    reading = rx.recv() => match reading {
                        Some(reading) => reading,
                        None => break,
                    },
                };
                fill_sun_times(&writer_provider, &mut reading).await;
                if let Err(err) = insert_reading(&pool, &reading).await {
                    tracing::warn!(
                        sink = %name,
                        station = %reading.station_name,
                        error = %err,
                        "insert failed, dropping reading"
                    );
                }
            }
            tracing::debug!(sink = %name, "timescale writer exited");
        }));

        let ping_reader = reader.clone();
        self.health_ticker = Some(spawn_health_ticker(
            self.name.clone(),
            self.provider.clone(),
            cancel.clone(),
            move || {
                let reader = ping_reader.clone();
                async move {
                    match reader.ping().await {
                        Ok(()) => SinkHealth::healthy("round-trip ok"),
                        Err(err) => SinkHealth::unhealthy("ping failed", err.to_string()),
                    }
                }
            },
        ));
        self.cancel = Some(cancel);
        Ok(tx)
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        join_writer(&self.name, &mut self.writer).await;
        if let Some(ticker) = self.health_ticker.take() {
            let _ = ticker.await;
        }
        *self.reader.write().await = None;
        Ok(())
    }

    async fn health_check(&self) -> SinkHealth {
        match self.reader.read().await.as_ref() {
            Some(reader) => match reader.ping().await {
                Ok(()) => SinkHealth::healthy("round-trip ok"),
                Err(err) => SinkHealth::unhealthy("ping failed", err.to_string()),
            },
            None => SinkHealth::unhealthy("not started", "no connection pool"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_sql_covers_every_column_once() {
        let sql = insert_sql();
        assert!(sql.contains("$100"));
        assert!(!sql.contains("$101"));
        for column in COLUMNS {
            assert!(sql.contains(column), "missing column {column}");
        }
    }

    #[test]
    fn table_ddl_types_special_columns() {
        let ddl = create_table_sql();
        assert!(ddl.contains("storm_start TIMESTAMPTZ"));
        assert!(ddl.contains("station_id UUID"));
        assert!(ddl.contains("inside_alarm SMALLINT NOT NULL DEFAULT 0"));
        assert!(ddl.contains("extra_text10 TEXT NOT NULL DEFAULT ''"));
        assert!(ddl.contains("wind_dir DOUBLE PRECISION NOT NULL DEFAULT 0"));
    }

    #[test]
    fn aggregate_ddl_uses_circular_mean_for_wind_dir() {
        let sql = continuous_aggregate_sql("weather_1m", "1 minute");
        assert!(sql.contains("circular_avg(wind_dir) AS avg_wind_dir"));
        assert!(sql.contains("avg(out_temp) AS avg_out_temp"));
        assert!(sql.contains("min(snow_distance) AS min_snow_distance"));
        assert!(sql.contains("time_bucket(INTERVAL '1 minute', time)"));
        // The arithmetic mean of wind direction is meaningless; only the
        // circular aggregate may touch it.
        assert!(!sql.contains("avg(wind_dir)"));
    }

    /// Mirrors the SQL final function so the property is checkable without
    /// a database: uniform directions have no preferred bearing, degenerate
    /// input returns the bearing itself.
    fn circular_mean(dirs: &[f64]) -> f64 {
        let (sum_sin, sum_cos) = dirs.iter().fold((0.0, 0.0), |(s, c), d| {
            (s + d.to_radians().sin(), c + d.to_radians().cos())
        });
        if sum_sin == 0.0 && sum_cos == 0.0 {
            return 0.0;
        }
        (sum_sin.atan2(sum_cos).to_degrees() + 360.0).rem_euclid(360.0)
    }

    #[test]
    fn circular_mean_handles_the_north_wraparound() {
        let mean = circular_mean(&[350.0, 10.0]);
        assert!(mean < 1e-9 || (360.0 - mean) < 1e-9, "got {mean}");
        assert!((circular_mean(&[270.0, 270.0, 270.0]) - 270.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn almanac_fill_computes_once_and_reuses_the_cache() {
        use crate::store::{DeviceConfig, SqliteProvider};

        let store = Arc::new(SqliteProvider::open_in_memory().unwrap());
        store
            .update_device(&DeviceConfig {
                name: "patio".to_string(),
                kind_tag: "ambient-customized".to_string(),
                enabled: true,
                port: Some(9100),
                path: Some("/report".to_string()),
                latitude: 39.7,
                longitude: -105.0,
                ..Default::default()
            })
            .await
            .unwrap();
        let provider: Arc<dyn ConfigProvider> = store.clone();

        let mut reading = Reading::new("patio", "ambient-customized");
        fill_sun_times(&provider, &mut reading).await;
        let sunrise = reading.sunrise.expect("sunrise filled");
        let sunset = reading.sunset.expect("sunset filled");
        assert!(sunset > sunrise);

        // The computation landed in the cache and later readings reuse it.
        let day = reading.time.date_naive();
        let cached = store
            .get_sun_times(39.7, -105.0, day)
            .await
            .unwrap()
            .expect("cache row written");
        assert_eq!(cached.sunrise, sunrise);

        let mut second = Reading::new("patio", "ambient-customized");
        second.time = reading.time;
        fill_sun_times(&provider, &mut second).await;
        assert_eq!(second.sunrise, Some(sunrise));
        assert_eq!(second.sunset, Some(sunset));
    }

    #[tokio::test]
    async fn almanac_fill_respects_console_supplied_times() {
        use crate::store::SqliteProvider;

        let provider: Arc<dyn ConfigProvider> =
            Arc::new(SqliteProvider::open_in_memory().unwrap());
        let console_sunrise = chrono::Utc::now();
        let console_sunset = console_sunrise + chrono::Duration::hours(10);
        let mut reading = Reading::new("backyard", "davis");
        reading.sunrise = Some(console_sunrise);
        reading.sunset = Some(console_sunset);

        fill_sun_times(&provider, &mut reading).await;
        assert_eq!(reading.sunrise, Some(console_sunrise));
        assert_eq!(reading.sunset, Some(console_sunset));

        // Unknown stations and sites without coordinates stay empty.
        let mut unknown = Reading::new("nowhere", "davis");
        fill_sun_times(&provider, &mut unknown).await;
        assert_eq!(unknown.sunrise, None);
        assert_eq!(unknown.sunset, None);
    }

    #[test]
    fn circular_mean_of_uniform_directions_is_degenerate() {
        let dirs: Vec<f64> = (0..360).map(f64::from).collect();
        let (sum_sin, sum_cos) = dirs.iter().fold((0.0, 0.0), |(s, c), d| {
            (s + d.to_radians().sin(), c + d.to_radians().cos())
        });
        // No preferred bearing: the resultant vector collapses to zero.
        assert!(sum_sin.abs() < 1e-9);
        assert!(sum_cos.abs() < 1e-9);
    }
}
