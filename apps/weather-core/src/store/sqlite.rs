//! rusqlite-backed [`ConfigProvider`]. All statements run on the blocking
//! pool; the single connection is shared behind a mutex.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::model::CapabilitySet;

use super::migrations;
use super::{
    AerisService, AprsService, ConfigProvider, ConfigTree, ControllerConfig, ControllerKind,
    DeviceConfig, HealthStatus, PwsWeatherService, RemoteStation, SinkHealth, SnowTotals,
    StorageBackendConfig, StorageConfig, StoreError, StoreResult, SunTimes,
    WeatherLinkLiveOptions, WeatherWebsite, WundergroundService, validate_devices,
};

#[derive(Clone)]
pub struct SqliteProvider {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProvider {
    /// Opens (creating if necessary) the config database and brings the
    /// schema to the current version. Any migration failure fails the open.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<SqliteProvider> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let version = migrations::migrate_up(&mut conn)?;
        tracing::info!(version, "config store open");
        Ok(SqliteProvider {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> StoreResult<SqliteProvider> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        migrations::migrate_up(&mut conn)?;
        Ok(SqliteProvider {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().expect("config store mutex");
            f(&mut guard)
        })
        .await
        .map_err(|err| StoreError::Join(err.to_string()))?
    }
}

fn parse_ts(text: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<DeviceConfig> {
    Ok(DeviceConfig {
        name: row.get("name")?,
        kind_tag: row.get("type")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        hostname: row.get("hostname")?,
        port: row.get::<_, Option<i64>>("port")?.map(|p| p as u16),
        serial_device: row.get("serial_device")?,
        baud: row.get::<_, Option<i64>>("baud")?.map(|b| b as u32),
        path: row.get("path")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        altitude: row.get("altitude")?,
        wind_dir_correction: row.get("wind_dir_correction")?,
        base_snow_distance: row.get("base_snow_distance")?,
        capability_override: row
            .get::<_, Option<i64>>("capabilities")?
            .map(|bits| CapabilitySet::from_bits(bits as u8)),
        remote_station_id: row
            .get::<_, Option<String>>("remote_station_id")?
            .and_then(|text| Uuid::parse_str(&text).ok()),
        wunderground: WundergroundService {
            enabled: row.get::<_, i64>("wu_enabled")? != 0,
            station_id: row.get("wu_station_id")?,
            password: row.get("wu_password")?,
            upload_interval_secs: row
                .get::<_, Option<i64>>("wu_upload_interval")?
                .map(|v| v as u64),
            upload_url: row.get("wu_upload_url")?,
        },
        pwsweather: PwsWeatherService {
            enabled: row.get::<_, i64>("pws_enabled")? != 0,
            station_id: row.get("pws_station_id")?,
            password: row.get("pws_password")?,
            upload_interval_secs: row
                .get::<_, Option<i64>>("pws_upload_interval")?
                .map(|v| v as u64),
            upload_url: row.get("pws_upload_url")?,
        },
        aeris: AerisService {
            enabled: row.get::<_, i64>("aeris_enabled")? != 0,
            api_client_id: row.get("aeris_api_client_id")?,
            api_client_secret: row.get("aeris_api_client_secret")?,
            api_endpoint: row.get("aeris_api_endpoint")?,
        },
        // Filled from station_aprs_configs after the base row loads.
        aprs: AprsService::default(),
        wll: WeatherLinkLiveOptions {
            sensor_mapping: row.get("wll_sensor_mapping")?,
            broadcast: row.get::<_, i64>("wll_broadcast")? != 0,
            poll_interval_secs: row
                .get::<_, Option<i64>>("wll_poll_interval")?
                .map(|v| v as u64),
        },
    })
}

fn load_devices(conn: &Connection) -> StoreResult<Vec<DeviceConfig>> {
    let mut stmt = conn.prepare("SELECT * FROM devices ORDER BY name")?;
    let mut devices: Vec<DeviceConfig> = stmt
        .query_map([], device_from_row)?
        .collect::<rusqlite::Result<_>>()?;

    let mut aprs_stmt =
        conn.prepare("SELECT enabled, callsign, passcode FROM station_aprs_configs WHERE device_name = ?1")?;
    for device in &mut devices {
        let aprs = aprs_stmt
            .query_row([&device.name], |row| {
                Ok(AprsService {
                    enabled: row.get::<_, i64>(0)? != 0,
                    callsign: row.get(1)?,
                    passcode: row.get(2)?,
                })
            })
            .optional()?;
        if let Some(aprs) = aprs {
            device.aprs = aprs;
        }
    }
    Ok(devices)
}

fn storage_from_row(row: &Row<'_>) -> rusqlite::Result<Option<StorageConfig>> {
    let name: String = row.get("name")?;
    let backend_tag: String = row.get("backend")?;
    let enabled = row.get::<_, i64>("enabled")? != 0;
    let backend = match backend_tag.as_str() {
        "timescaledb" => StorageBackendConfig::TimescaleDb {
            dsn: row.get::<_, Option<String>>("timescale_dsn")?.unwrap_or_default(),
        },
        "grpc" => StorageBackendConfig::Grpc {
            endpoint: row.get::<_, Option<String>>("grpc_endpoint")?.unwrap_or_default(),
            tls_cert: row.get("grpc_tls_cert")?,
            tls_key: row.get("grpc_tls_key")?,
        },
        "aprs" => StorageBackendConfig::Aprs {
            server: row.get::<_, Option<String>>("aprs_server")?.unwrap_or_default(),
        },
        _ => return Ok(None),
    };
    let health = match (
        row.get::<_, Option<String>>("health_status")?,
        row.get::<_, Option<String>>("health_checked_at")?,
    ) {
        (Some(status), Some(checked_at)) => Some(SinkHealth {
            status: if status == "healthy" {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            message: row
                .get::<_, Option<String>>("health_message")?
                .unwrap_or_default(),
            error: row.get("health_error")?,
            last_check: parse_ts(checked_at)?,
        }),
        _ => None,
    };
    Ok(Some(StorageConfig {
        name,
        enabled,
        backend,
        health,
    }))
}

fn load_storage(conn: &Connection) -> StoreResult<Vec<StorageConfig>> {
    let mut stmt = conn.prepare("SELECT * FROM storage_configs ORDER BY name")?;
    let rows = stmt.query_map([], storage_from_row)?;
    let mut configs = Vec::new();
    for row in rows {
        match row? {
            Some(config) => configs.push(config),
            None => tracing::warn!("skipping storage row with unknown backend"),
        }
    }
    Ok(configs)
}

fn load_controllers(conn: &Connection) -> StoreResult<Vec<ControllerConfig>> {
    let mut stmt =
        conn.prepare("SELECT type, enabled, endpoint, fetch_interval FROM controller_configs")?;
    let rows = stmt.query_map([], |row| {
        let tag: String = row.get(0)?;
        Ok((
            tag,
            row.get::<_, i64>(1)? != 0,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<i64>>(3)?,
        ))
    })?;
    let mut controllers = Vec::new();
    for row in rows {
        let (tag, enabled, endpoint, fetch_interval) = row?;
        match ControllerKind::parse(&tag) {
            Some(kind) => controllers.push(ControllerConfig {
                kind,
                enabled,
                endpoint,
                fetch_interval_secs: fetch_interval.map(|v| v as u64),
            }),
            None => tracing::warn!(controller = %tag, "skipping unknown controller type"),
        }
    }
    Ok(controllers)
}

fn load_websites(conn: &Connection) -> StoreResult<Vec<WeatherWebsite>> {
    let mut stmt = conn.prepare(
        "SELECT name, hostname, page_title, about, device_name FROM weather_websites ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(WeatherWebsite {
            name: row.get(0)?,
            hostname: row.get(1)?,
            page_title: row.get(2)?,
            about: row.get(3)?,
            device_name: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

fn remote_from_row(row: &Row<'_>) -> rusqlite::Result<RemoteStation> {
    let id_text: String = row.get("station_id")?;
    let station_id = Uuid::parse_str(&id_text).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(RemoteStation {
        station_id,
        station_name: row.get("station_name")?,
        station_type: row.get("station_type")?,
        aprs_enabled: row.get::<_, i64>("aprs_enabled")? != 0,
        aprs_callsign: row.get("aprs_callsign")?,
        wu_enabled: row.get::<_, i64>("wu_enabled")? != 0,
        wu_station_id: row.get("wu_station_id")?,
        wu_password: row.get("wu_password")?,
        pws_enabled: row.get::<_, i64>("pws_enabled")? != 0,
        pws_station_id: row.get("pws_station_id")?,
        pws_password: row.get("pws_password")?,
        aeris_enabled: row.get::<_, i64>("aeris_enabled")? != 0,
        aeris_api_client_id: row.get("aeris_api_client_id")?,
        aeris_api_client_secret: row.get("aeris_api_client_secret")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        altitude: row.get("altitude")?,
        registered_at: parse_ts(row.get("registered_at")?)?,
        last_seen: parse_ts(row.get("last_seen")?)?,
    })
}

#[async_trait]
impl ConfigProvider for SqliteProvider {
    async fn load_config(&self) -> StoreResult<ConfigTree> {
        self.blocking(|conn| {
            let devices = load_devices(conn)?;
            let errors = validate_devices(&devices);
            if !errors.is_empty() {
                return Err(StoreError::Validation(errors));
            }
            Ok(ConfigTree {
                devices,
                storage: load_storage(conn)?,
                controllers: load_controllers(conn)?,
                websites: load_websites(conn)?,
            })
        })
        .await
    }

    async fn get_devices(&self) -> StoreResult<Vec<DeviceConfig>> {
        self.blocking(|conn| load_devices(conn)).await
    }

    async fn get_storage_configs(&self) -> StoreResult<Vec<StorageConfig>> {
        self.blocking(|conn| load_storage(conn)).await
    }

    async fn get_controllers(&self) -> StoreResult<Vec<ControllerConfig>> {
        self.blocking(|conn| load_controllers(conn)).await
    }

    async fn update_device(&self, device: &DeviceConfig) -> StoreResult<()> {
        let device = device.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                r#"
INSERT INTO devices (
    config_id, name, type, enabled, hostname, port, serial_device, baud, path,
    latitude, longitude, altitude, wind_dir_correction, base_snow_distance,
    capabilities, remote_station_id,
    wu_enabled, wu_station_id, wu_password, wu_upload_interval, wu_upload_url,
    pws_enabled, pws_station_id, pws_password, pws_upload_interval, pws_upload_url,
    aeris_enabled, aeris_api_client_id, aeris_api_client_secret, aeris_api_endpoint,
    wll_sensor_mapping, wll_broadcast, wll_poll_interval
) VALUES (
    1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
    ?9, ?10, ?11, ?12, ?13, ?14, ?15,
    ?16, ?17, ?18, ?19, ?20,
    ?21, ?22, ?23, ?24, ?25,
    ?26, ?27, ?28, ?29,
    ?30, ?31, ?32
)
ON CONFLICT (config_id, name) DO UPDATE SET
    type = excluded.type,
    enabled = excluded.enabled,
    hostname = excluded.hostname,
    port = excluded.port,
    serial_device = excluded.serial_device,
    baud = excluded.baud,
    path = excluded.path,
    latitude = excluded.latitude,
    longitude = excluded.longitude,
    altitude = excluded.altitude,
    wind_dir_correction = excluded.wind_dir_correction,
    base_snow_distance = excluded.base_snow_distance,
    capabilities = excluded.capabilities,
    remote_station_id = excluded.remote_station_id,
    wu_enabled = excluded.wu_enabled,
    wu_station_id = excluded.wu_station_id,
    wu_password = excluded.wu_password,
    wu_upload_interval = excluded.wu_upload_interval,
    wu_upload_url = excluded.wu_upload_url,
    pws_enabled = excluded.pws_enabled,
    pws_station_id = excluded.pws_station_id,
    pws_password = excluded.pws_password,
    pws_upload_interval = excluded.pws_upload_interval,
    pws_upload_url = excluded.pws_upload_url,
    aeris_enabled = excluded.aeris_enabled,
    aeris_api_client_id = excluded.aeris_api_client_id,
    aeris_api_client_secret = excluded.aeris_api_client_secret,
    aeris_api_endpoint = excluded.aeris_api_endpoint,
    wll_sensor_mapping = excluded.wll_sensor_mapping,
    wll_broadcast = excluded.wll_broadcast,
    wll_poll_interval = excluded.wll_poll_interval
"#,
                params![
                    device.name,
                    device.kind_tag,
                    device.enabled as i64,
                    device.hostname,
                    device.port.map(|p| p as i64),
                    device.serial_device,
                    device.baud.map(|b| b as i64),
                    device.path,
                    device.latitude,
                    device.longitude,
                    device.altitude,
                    device.wind_dir_correction,
                    device.base_snow_distance,
                    device.capability_override.map(|c| c.bits() as i64),
                    device.remote_station_id.map(|id| id.to_string()),
                    device.wunderground.enabled as i64,
                    device.wunderground.station_id,
                    device.wunderground.password,
                    device.wunderground.upload_interval_secs.map(|v| v as i64),
                    device.wunderground.upload_url,
                    device.pwsweather.enabled as i64,
                    device.pwsweather.station_id,
                    device.pwsweather.password,
                    device.pwsweather.upload_interval_secs.map(|v| v as i64),
                    device.pwsweather.upload_url,
                    device.aeris.enabled as i64,
                    device.aeris.api_client_id,
                    device.aeris.api_client_secret,
                    device.aeris.api_endpoint,
                    device.wll.sensor_mapping,
                    device.wll.broadcast as i64,
                    device.wll.poll_interval_secs.map(|v| v as i64),
                ],
            )?;
            tx.execute(
                r#"
INSERT INTO station_aprs_configs (device_name, enabled, callsign, passcode)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (device_name) DO UPDATE SET
    enabled = excluded.enabled,
    callsign = excluded.callsign,
    passcode = excluded.passcode
"#,
                params![
                    device.name,
                    device.aprs.enabled as i64,
                    device.aprs.callsign,
                    device.aprs.passcode,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn update_controller(&self, controller: &ControllerConfig) -> StoreResult<()> {
        let controller = controller.clone();
        self.blocking(move |conn| {
            conn.execute(
                r#"
INSERT INTO controller_configs (config_id, type, enabled, endpoint, fetch_interval)
VALUES (1, ?1, ?2, ?3, ?4)
ON CONFLICT (type) DO UPDATE SET
    enabled = excluded.enabled,
    endpoint = excluded.endpoint,
    fetch_interval = excluded.fetch_interval
"#,
                params![
                    controller.kind.as_tag(),
                    controller.enabled as i64,
                    controller.endpoint,
                    controller.fetch_interval_secs.map(|v| v as i64),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn register_remote_station(&self, station: &RemoteStation) -> StoreResult<()> {
        let station = station.clone();
        self.blocking(move |conn| {
            // registered_at survives re-registration; credentials update in place.
            conn.execute(
                r#"
INSERT INTO remote_stations (
    station_id, station_name, station_type,
    aprs_enabled, aprs_callsign,
    wu_enabled, wu_station_id, wu_password,
    pws_enabled, pws_station_id, pws_password,
    aeris_enabled, aeris_api_client_id, aeris_api_client_secret,
    latitude, longitude, altitude,
    registered_at, last_seen
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
ON CONFLICT (station_id) DO UPDATE SET
    station_name = excluded.station_name,
    station_type = excluded.station_type,
    aprs_enabled = excluded.aprs_enabled,
    aprs_callsign = excluded.aprs_callsign,
    wu_enabled = excluded.wu_enabled,
    wu_station_id = excluded.wu_station_id,
    wu_password = excluded.wu_password,
    pws_enabled = excluded.pws_enabled,
    pws_station_id = excluded.pws_station_id,
    pws_password = excluded.pws_password,
    aeris_enabled = excluded.aeris_enabled,
    aeris_api_client_id = excluded.aeris_api_client_id,
    aeris_api_client_secret = excluded.aeris_api_client_secret,
    latitude = excluded.latitude,
    longitude = excluded.longitude,
    altitude = excluded.altitude,
    last_seen = excluded.last_seen
"#,
                params![
                    station.station_id.to_string(),
                    station.station_name,
                    station.station_type,
                    station.aprs_enabled as i64,
                    station.aprs_callsign,
                    station.wu_enabled as i64,
                    station.wu_station_id,
                    station.wu_password,
                    station.pws_enabled as i64,
                    station.pws_station_id,
                    station.pws_password,
                    station.aeris_enabled as i64,
                    station.aeris_api_client_id,
                    station.aeris_api_client_secret,
                    station.latitude,
                    station.longitude,
                    station.altitude,
                    station.registered_at.to_rfc3339(),
                    station.last_seen.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_remote_stations(&self) -> StoreResult<Vec<RemoteStation>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM remote_stations ORDER BY station_name")?;
            let rows = stmt.query_map([], remote_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn update_remote_station_last_seen(
        &self,
        station_id: Uuid,
        last_seen: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.blocking(move |conn| {
            let updated = conn.execute(
                "UPDATE remote_stations SET last_seen = ?2 WHERE station_id = ?1",
                params![station_id.to_string(), last_seen.to_rfc3339()],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(station_id.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn update_storage_health(&self, name: &str, health: &SinkHealth) -> StoreResult<()> {
        let name = name.to_string();
        let health = health.clone();
        self.blocking(move |conn| {
            let status = match health.status {
                HealthStatus::Healthy => "healthy",
                HealthStatus::Unhealthy => "unhealthy",
            };
            let updated = conn.execute(
                r#"
UPDATE storage_configs
SET health_status = ?2, health_message = ?3, health_error = ?4, health_checked_at = ?5
WHERE name = ?1
"#,
                params![
                    name,
                    status,
                    health.message,
                    health.error,
                    health.last_check.to_rfc3339(),
                ],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(name));
            }
            Ok(())
        })
        .await
    }

    async fn get_snow_totals(&self, station_name: &str) -> StoreResult<Option<SnowTotals>> {
        let station_name = station_name.to_string();
        self.blocking(move |conn| {
            let totals = conn
                .query_row(
                    r#"
SELECT station_name, midnight_mm, last24_mm, last72_mm, season_mm, computed_at
FROM snow_totals_cache WHERE station_name = ?1
"#,
                    [&station_name],
                    |row| {
                        Ok(SnowTotals {
                            station_name: row.get(0)?,
                            midnight_mm: row.get(1)?,
                            last24_mm: row.get(2)?,
                            last72_mm: row.get(3)?,
                            season_mm: row.get(4)?,
                            computed_at: parse_ts(row.get(5)?)?,
                        })
                    },
                )
                .optional()?;
            Ok(totals)
        })
        .await
    }

    async fn upsert_snow_totals(&self, totals: &SnowTotals) -> StoreResult<()> {
        let totals = totals.clone();
        self.blocking(move |conn| {
            conn.execute(
                r#"
INSERT INTO snow_totals_cache (station_name, midnight_mm, last24_mm, last72_mm, season_mm, computed_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT (station_name) DO UPDATE SET
    midnight_mm = excluded.midnight_mm,
    last24_mm = excluded.last24_mm,
    last72_mm = excluded.last72_mm,
    season_mm = excluded.season_mm,
    computed_at = excluded.computed_at
"#,
                params![
                    totals.station_name,
                    totals.midnight_mm,
                    totals.last24_mm,
                    totals.last72_mm,
                    totals.season_mm,
                    totals.computed_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_sun_times(
        &self,
        latitude: f64,
        longitude: f64,
        day: chrono::NaiveDate,
    ) -> StoreResult<Option<SunTimes>> {
        self.blocking(move |conn| {
            let times = conn
                .query_row(
                    "SELECT sunrise, sunset FROM sun_times \
                     WHERE latitude = ?1 AND longitude = ?2 AND day = ?3",
                    params![latitude, longitude, day.to_string()],
                    |row| {
                        Ok(SunTimes {
                            latitude,
                            longitude,
                            day,
                            sunrise: parse_ts(row.get(0)?)?,
                            sunset: parse_ts(row.get(1)?)?,
                        })
                    },
                )
                .optional()?;
            Ok(times)
        })
        .await
    }

    async fn upsert_sun_times(&self, times: &SunTimes) -> StoreResult<()> {
        let times = *times;
        self.blocking(move |conn| {
            conn.execute(
                r#"
INSERT INTO sun_times (latitude, longitude, day, sunrise, sunset)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT (latitude, longitude, day) DO UPDATE SET
    sunrise = excluded.sunrise,
    sunset = excluded.sunset
"#,
                params![
                    times.latitude,
                    times.longitude,
                    times.day.to_string(),
                    times.sunrise.to_rfc3339(),
                    times.sunset.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }
}

/// Seeds a storage row so health updates have a target. Used by startup
/// when a sink from the environment is not yet present in the store.
impl SqliteProvider {
    pub async fn ensure_storage_config(&self, config: &StorageConfig) -> StoreResult<()> {
        let config = config.clone();
        self.blocking(move |conn| {
            let (dsn, endpoint, cert, key, server) = match &config.backend {
                StorageBackendConfig::TimescaleDb { dsn } => {
                    (Some(dsn.clone()), None, None, None, None)
                }
                StorageBackendConfig::Grpc {
                    endpoint,
                    tls_cert,
                    tls_key,
                } => (
                    None,
                    Some(endpoint.clone()),
                    tls_cert.clone(),
                    tls_key.clone(),
                    None,
                ),
                StorageBackendConfig::Aprs { server } => {
                    (None, None, None, None, Some(server.clone()))
                }
            };
            conn.execute(
                r#"
INSERT INTO storage_configs (config_id, name, backend, enabled, timescale_dsn,
                             grpc_endpoint, grpc_tls_cert, grpc_tls_key, aprs_server)
VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT (name) DO UPDATE SET
    backend = excluded.backend,
    enabled = excluded.enabled,
    timescale_dsn = excluded.timescale_dsn,
    grpc_endpoint = excluded.grpc_endpoint,
    grpc_tls_cert = excluded.grpc_tls_cert,
    grpc_tls_key = excluded.grpc_tls_key,
    aprs_server = excluded.aprs_server
"#,
                params![
                    config.name,
                    config.backend.backend_tag(),
                    config.enabled as i64,
                    dsn,
                    endpoint,
                    cert,
                    key,
                    server,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn davis_device(name: &str) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            kind_tag: "davis".to_string(),
            enabled: true,
            hostname: Some("console.local".to_string()),
            port: Some(22222),
            latitude: 39.7,
            longitude: -105.1,
            altitude: 1608.0,
            aprs: AprsService {
                enabled: true,
                callsign: "K0TEST".to_string(),
                passcode: "12345".to_string(),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn device_round_trip_including_aprs() {
        let store = SqliteProvider::open_in_memory().unwrap();
        store.update_device(&davis_device("backyard")).await.unwrap();

        let devices = store.get_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "backyard");
        assert_eq!(devices[0].port, Some(22222));
        assert!(devices[0].aprs.enabled);
        assert_eq!(devices[0].aprs.callsign, "K0TEST");

        // Update in place keeps a single row.
        let mut changed = davis_device("backyard");
        changed.port = Some(3333);
        store.update_device(&changed).await.unwrap();
        let devices = store.get_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].port, Some(3333));
    }

    #[tokio::test]
    async fn load_config_surfaces_all_validation_errors() {
        let store = SqliteProvider::open_in_memory().unwrap();
        let mut bad = davis_device("lonely");
        bad.hostname = None;
        bad.serial_device = None;
        store.update_device(&bad).await.unwrap();
        let mut snow = davis_device("gauge");
        snow.kind_tag = "snowgauge".to_string();
        snow.base_snow_distance = 0.0;
        store.update_device(&snow).await.unwrap();

        match store.load_config().await {
            Err(StoreError::Validation(errors)) => {
                assert_eq!(errors.len(), 2, "{errors:?}");
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn remote_station_register_and_touch() {
        let store = SqliteProvider::open_in_memory().unwrap();
        let now = Utc::now();
        let station = RemoteStation {
            station_id: Uuid::new_v4(),
            station_name: "remote-a".to_string(),
            station_type: "davis".to_string(),
            aprs_enabled: true,
            aprs_callsign: "K0TEST".to_string(),
            wu_enabled: false,
            wu_station_id: String::new(),
            wu_password: String::new(),
            pws_enabled: false,
            pws_station_id: String::new(),
            pws_password: String::new(),
            aeris_enabled: false,
            aeris_api_client_id: String::new(),
            aeris_api_client_secret: String::new(),
            latitude: 1.0,
            longitude: 2.0,
            altitude: 3.0,
            registered_at: now,
            last_seen: now,
        };
        store.register_remote_station(&station).await.unwrap();

        // Re-registration updates credentials but never duplicates the row.
        let mut updated = station.clone();
        updated.aprs_callsign = "K0NEW".to_string();
        store.register_remote_station(&updated).await.unwrap();
        let stations = store.get_remote_stations().await.unwrap();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].aprs_callsign, "K0NEW");

        let later = now + chrono::Duration::minutes(5);
        store
            .update_remote_station_last_seen(station.station_id, later)
            .await
            .unwrap();
        let stations = store.get_remote_stations().await.unwrap();
        assert_eq!(stations[0].last_seen.timestamp(), later.timestamp());

        let missing = store
            .update_remote_station_last_seen(Uuid::new_v4(), later)
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn storage_health_round_trip() {
        let store = SqliteProvider::open_in_memory().unwrap();
        store
            .ensure_storage_config(&StorageConfig {
                name: "timescaledb".to_string(),
                enabled: true,
                backend: StorageBackendConfig::TimescaleDb {
                    dsn: "postgres://localhost/weather".to_string(),
                },
                health: None,
            })
            .await
            .unwrap();

        store
            .update_storage_health("timescaledb", &SinkHealth::healthy("connected"))
            .await
            .unwrap();
        let configs = store.get_storage_configs().await.unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].backend.backend_tag(), "timescaledb");
        let health = configs[0].health.as_ref().expect("health recorded");
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.message, "connected");

        let missing = store
            .update_storage_health("grpc", &SinkHealth::healthy("x"))
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn sun_times_upsert_and_fetch_by_site_and_day() {
        let store = SqliteProvider::open_in_memory().unwrap();
        let day = chrono::NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        assert!(store.get_sun_times(39.7, -105.0, day).await.unwrap().is_none());

        let times = SunTimes {
            latitude: 39.7,
            longitude: -105.0,
            day,
            sunrise: Utc::now(),
            sunset: Utc::now() + chrono::Duration::hours(12),
        };
        store.upsert_sun_times(&times).await.unwrap();

        let cached = store
            .get_sun_times(39.7, -105.0, day)
            .await
            .unwrap()
            .expect("row stored");
        assert_eq!(cached.sunrise.timestamp(), times.sunrise.timestamp());
        assert_eq!(cached.sunset.timestamp(), times.sunset.timestamp());

        // Same key replaces in place, other sites and days are separate.
        let mut shifted = times;
        shifted.sunset = times.sunset + chrono::Duration::minutes(1);
        store.upsert_sun_times(&shifted).await.unwrap();
        let cached = store.get_sun_times(39.7, -105.0, day).await.unwrap().unwrap();
        assert_eq!(cached.sunset.timestamp(), shifted.sunset.timestamp());
        assert!(store
            .get_sun_times(39.7, -104.0, day)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn snow_totals_upsert_and_fetch() {
        let store = SqliteProvider::open_in_memory().unwrap();
        assert!(store.get_snow_totals("gauge").await.unwrap().is_none());
        let totals = SnowTotals {
            station_name: "gauge".to_string(),
            midnight_mm: 5.0,
            last24_mm: 12.0,
            last72_mm: 30.0,
            season_mm: 100.0,
            computed_at: Utc::now(),
        };
        store.upsert_snow_totals(&totals).await.unwrap();
        let cached = store.get_snow_totals("gauge").await.unwrap().unwrap();
        assert_eq!(cached.last24_mm, 12.0);
    }
}
