//! Versioned relational configuration store.
//!
//! A single-file SQLite database holds every durable knob: devices, storage
//! sinks, upload controllers, remote-station registrations, and the snow
//! totals cache. The rest of the daemon consumes it through the narrow
//! [`ConfigProvider`] trait; a caching wrapper memoizes reads and any
//! mutator invalidates the cache.

mod cache;
mod migrations;
mod overlay;
mod sqlite;

pub use cache::CachedProvider;
pub use migrations::{Migration, MIGRATIONS};
pub use overlay::OverlayProvider;
pub use sqlite::SqliteProvider;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{capabilities_for_tag, CapabilitySet, StationKind};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("configuration invalid: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("migration {version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: rusqlite::Error,
    },
    #[error("migration {version} applied out of order (store at {current})")]
    MigrationOrder { version: i64, current: i64 },
    #[error("no such entry: {0}")]
    NotFound(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Join(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WundergroundService {
    pub enabled: bool,
    pub station_id: String,
    pub password: String,
    pub upload_interval_secs: Option<u64>,
    pub upload_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PwsWeatherService {
    pub enabled: bool,
    pub station_id: String,
    pub password: String,
    pub upload_interval_secs: Option<u64>,
    pub upload_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AerisService {
    pub enabled: bool,
    pub api_client_id: String,
    pub api_client_secret: String,
    pub api_endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AprsService {
    pub enabled: bool,
    pub callsign: String,
    pub passcode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherLinkLiveOptions {
    pub sensor_mapping: String,
    pub broadcast: bool,
    pub poll_interval_secs: Option<u64>,
}

/// One physical or virtual data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub kind_tag: String,
    pub enabled: bool,

    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub serial_device: Option<String>,
    pub baud: Option<u32>,
    pub path: Option<String>,

    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,

    pub wind_dir_correction: f64,
    pub base_snow_distance: f64,

    /// Explicit capability override; `None` derives from the type tag.
    pub capability_override: Option<CapabilitySet>,

    /// UUID assigned by a remote aggregation core the first time the gRPC
    /// sink registered this station; reused across reconnects.
    pub remote_station_id: Option<Uuid>,

    pub wunderground: WundergroundService,
    pub pwsweather: PwsWeatherService,
    pub aeris: AerisService,
    pub aprs: AprsService,
    pub wll: WeatherLinkLiveOptions,
}

impl DeviceConfig {
    pub fn kind(&self) -> Option<StationKind> {
        StationKind::parse(&self.kind_tag)
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capability_override
            .unwrap_or_else(|| capabilities_for_tag(&self.kind_tag))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageBackendConfig {
    #[serde(rename = "timescaledb")]
    TimescaleDb { dsn: String },
    Grpc {
        endpoint: String,
        tls_cert: Option<String>,
        tls_key: Option<String>,
    },
    Aprs { server: String },
}

impl StorageBackendConfig {
    pub fn backend_tag(&self) -> &'static str {
        match self {
            StorageBackendConfig::TimescaleDb { .. } => "timescaledb",
            StorageBackendConfig::Grpc { .. } => "grpc",
            StorageBackendConfig::Aprs { .. } => "aprs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub name: String,
    pub enabled: bool,
    pub backend: StorageBackendConfig,
    /// Last probe written by the health monitor, if any has run yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<SinkHealth>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    Wunderground,
    PwsWeather,
    Aeris,
}

impl ControllerKind {
    pub fn parse(tag: &str) -> Option<ControllerKind> {
        match tag {
            "wunderground" => Some(ControllerKind::Wunderground),
            "pwsweather" => Some(ControllerKind::PwsWeather),
            "aeris" => Some(ControllerKind::Aeris),
            _ => None,
        }
    }

    pub fn as_tag(self) -> &'static str {
        match self {
            ControllerKind::Wunderground => "wunderground",
            ControllerKind::PwsWeather => "pwsweather",
            ControllerKind::Aeris => "aeris",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub kind: ControllerKind,
    pub enabled: bool,
    /// Network-wide API endpoint override; each controller has a default.
    pub endpoint: Option<String>,
    pub fetch_interval_secs: Option<u64>,
}

/// Public weather website definition served by the portal layer; carried in
/// the config store so a site and its backing device stay in one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherWebsite {
    pub name: String,
    pub hostname: Option<String>,
    pub page_title: Option<String>,
    pub about: Option<String>,
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStation {
    pub station_id: Uuid,
    pub station_name: String,
    pub station_type: String,

    pub aprs_enabled: bool,
    pub aprs_callsign: String,

    pub wu_enabled: bool,
    pub wu_station_id: String,
    pub wu_password: String,

    pub pws_enabled: bool,
    pub pws_station_id: String,
    pub pws_password: String,

    pub aeris_enabled: bool,
    pub aeris_api_client_id: String,
    pub aeris_api_client_secret: String,

    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,

    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl RemoteStation {
    pub fn capabilities(&self) -> CapabilitySet {
        capabilities_for_tag(&self.station_type)
    }

    /// Projects this registration as a virtual device so controllers and
    /// the REST layer treat it exactly like a locally configured station.
    pub fn as_virtual_device(&self) -> DeviceConfig {
        DeviceConfig {
            name: self.station_name.clone(),
            kind_tag: self.station_type.clone(),
            enabled: true,
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            capability_override: Some(self.capabilities()),
            wunderground: WundergroundService {
                enabled: self.wu_enabled,
                station_id: self.wu_station_id.clone(),
                password: self.wu_password.clone(),
                ..Default::default()
            },
            pwsweather: PwsWeatherService {
                enabled: self.pws_enabled,
                station_id: self.pws_station_id.clone(),
                password: self.pws_password.clone(),
                ..Default::default()
            },
            aeris: AerisService {
                enabled: self.aeris_enabled,
                api_client_id: self.aeris_api_client_id.clone(),
                api_client_secret: self.aeris_api_client_secret.clone(),
                ..Default::default()
            },
            aprs: AprsService {
                enabled: self.aprs_enabled,
                callsign: self.aprs_callsign.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkHealth {
    pub status: HealthStatus,
    pub message: String,
    pub error: Option<String>,
    pub last_check: DateTime<Utc>,
}

impl SinkHealth {
    pub fn healthy(message: impl Into<String>) -> SinkHealth {
        SinkHealth {
            status: HealthStatus::Healthy,
            message: message.into(),
            error: None,
            last_check: Utc::now(),
        }
    }

    pub fn unhealthy(message: impl Into<String>, error: impl Into<String>) -> SinkHealth {
        SinkHealth {
            status: HealthStatus::Unhealthy,
            message: message.into(),
            error: Some(error.into()),
            last_check: Utc::now(),
        }
    }
}

/// One day of precomputed sunrise/sunset for a site, keyed by coordinates
/// and date. Filled lazily for stations whose protocol has no almanac.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunTimes {
    pub latitude: f64,
    pub longitude: f64,
    pub day: NaiveDate,
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnowTotals {
    pub station_name: String,
    pub midnight_mm: f64,
    pub last24_mm: f64,
    pub last72_mm: f64,
    pub season_mm: f64,
    pub computed_at: DateTime<Utc>,
}

/// Fully loaded and validated configuration tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTree {
    pub devices: Vec<DeviceConfig>,
    pub storage: Vec<StorageConfig>,
    pub controllers: Vec<ControllerConfig>,
    pub websites: Vec<WeatherWebsite>,
}

#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Loads and validates the whole tree. Validation failures carry every
    /// problem at once so an operator fixes them in one pass.
    async fn load_config(&self) -> StoreResult<ConfigTree>;

    async fn get_devices(&self) -> StoreResult<Vec<DeviceConfig>>;
    async fn get_storage_configs(&self) -> StoreResult<Vec<StorageConfig>>;
    async fn get_controllers(&self) -> StoreResult<Vec<ControllerConfig>>;

    async fn update_device(&self, device: &DeviceConfig) -> StoreResult<()>;
    async fn update_controller(&self, controller: &ControllerConfig) -> StoreResult<()>;

    async fn register_remote_station(&self, station: &RemoteStation) -> StoreResult<()>;
    async fn get_remote_stations(&self) -> StoreResult<Vec<RemoteStation>>;
    async fn update_remote_station_last_seen(
        &self,
        station_id: Uuid,
        last_seen: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn update_storage_health(&self, name: &str, health: &SinkHealth) -> StoreResult<()>;

    async fn get_snow_totals(&self, station_name: &str) -> StoreResult<Option<SnowTotals>>;
    async fn upsert_snow_totals(&self, totals: &SnowTotals) -> StoreResult<()>;

    async fn get_sun_times(
        &self,
        latitude: f64,
        longitude: f64,
        day: NaiveDate,
    ) -> StoreResult<Option<SunTimes>>;
    async fn upsert_sun_times(&self, times: &SunTimes) -> StoreResult<()>;
}

/// Device-row validation shared by every provider implementation. Returns
/// every problem found, not just the first.
pub fn validate_devices(devices: &[DeviceConfig]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for device in devices {
        if device.name.trim().is_empty() {
            errors.push("device with empty name".to_string());
            continue;
        }
        if !seen.insert(device.name.clone()) {
            errors.push(format!("duplicate device name {:?}", device.name));
        }
        let Some(kind) = device.kind() else {
            errors.push(format!(
                "device {:?} has unknown type {:?}",
                device.name, device.kind_tag
            ));
            continue;
        };
        match kind {
            StationKind::Davis => {
                let tcp = device.hostname.is_some() && device.port.is_some();
                let serial = device.serial_device.is_some() && device.baud.is_some();
                if !tcp && !serial {
                    errors.push(format!(
                        "device {:?} needs hostname+port or serial device+baud",
                        device.name
                    ));
                }
            }
            StationKind::Campbell | StationKind::SnowGauge => {
                if device.hostname.is_none() || device.port.is_none() {
                    errors.push(format!("device {:?} needs hostname and port", device.name));
                }
            }
            StationKind::AirGradient | StationKind::WeatherLinkLive => {
                if device.hostname.is_none() {
                    errors.push(format!("device {:?} needs a hostname", device.name));
                }
            }
            StationKind::AmbientCustomized => {
                if device.port.is_none() {
                    errors.push(format!("device {:?} needs a listen port", device.name));
                }
                match device.path.as_deref() {
                    Some(path) if path.starts_with('/') => {}
                    Some(path) => errors.push(format!(
                        "device {:?} path {:?} must start with /",
                        device.name, path
                    )),
                    None => errors.push(format!("device {:?} needs a path", device.name)),
                }
            }
            StationKind::GrpcReceiver => {
                if device.port.is_none() {
                    errors.push(format!("device {:?} needs a listen port", device.name));
                }
            }
        }
        if device.capabilities().contains(CapabilitySet::SNOW) && device.base_snow_distance <= 0.0
        {
            errors.push(format!(
                "snow device {:?} needs base_snow_distance > 0",
                device.name
            ));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn davis(name: &str) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            kind_tag: "davis".to_string(),
            enabled: true,
            hostname: Some("console.local".to_string()),
            port: Some(22222),
            ..Default::default()
        }
    }

    #[test]
    fn validation_collects_every_error() {
        let mut snow = DeviceConfig {
            name: "roof-gauge".to_string(),
            kind_tag: "snowgauge".to_string(),
            enabled: true,
            hostname: Some("gauge.local".to_string()),
            ..Default::default()
        };
        snow.base_snow_distance = 0.0;

        let ambient = DeviceConfig {
            name: "patio".to_string(),
            kind_tag: "ambient-customized".to_string(),
            enabled: true,
            port: Some(9000),
            path: Some("report".to_string()),
            ..Default::default()
        };

        let errors = validate_devices(&[davis("a"), davis("a"), snow, ambient]);
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("duplicate device name")));
        assert!(errors.iter().any(|e| e.contains("needs hostname and port")));
        assert!(errors.iter().any(|e| e.contains("base_snow_distance")));
        assert!(errors.iter().any(|e| e.contains("must start with /")));
    }

    #[test]
    fn capability_override_beats_type_default() {
        let mut device = davis("both");
        assert_eq!(device.capabilities(), CapabilitySet::WEATHER);
        device.capability_override = Some(CapabilitySet::WEATHER | CapabilitySet::SNOW);
        assert!(device.capabilities().contains(CapabilitySet::SNOW));
    }

    #[test]
    fn remote_station_projects_as_weather_device() {
        let remote = RemoteStation {
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
            latitude: 39.7,
            longitude: -105.0,
            altitude: 1600.0,
            registered_at: Utc::now(),
            last_seen: Utc::now(),
        };
        let device = remote.as_virtual_device();
        assert_eq!(device.name, "remote-a");
        assert!(device.capabilities().contains(CapabilitySet::WEATHER));
        assert!(device.aprs.enabled);
        assert_eq!(device.aprs.callsign, "K0TEST");
    }
}
