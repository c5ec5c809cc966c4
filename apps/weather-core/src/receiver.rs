//! Remote-station registry and inbound gRPC receiver. Remote collectors
//! register by UUID, then stream readings; the registry authenticates each
//! stream entry, stamps the registered station name, and forwards onto the
//! same distribution bus the local drivers feed. `last_seen` is tracked on
//! an atomic per entry and flushed to the store at most once per station
//! per minute.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use uuid::Uuid;

use crate::drivers::DriverOutlet;
use crate::model::Reading;
use crate::proto;
use crate::proto::weather_v1_server::{WeatherV1, WeatherV1Server};
use crate::store::{ConfigProvider, RemoteStation, StoreResult};

/// Minimum spacing between per-station `last_seen` flushes to the store.
const LAST_SEEN_FLUSH_SECS: i64 = 60;

struct RegistryEntry {
    station: RemoteStation,
    last_seen_unix: AtomicI64,
    last_flush_unix: AtomicI64,
}

pub struct RemoteRegistry {
    provider: Arc<dyn ConfigProvider>,
    entries: RwLock<HashMap<Uuid, Arc<RegistryEntry>>>,
}

impl RemoteRegistry {
    pub fn new(provider: Arc<dyn ConfigProvider>) -> RemoteRegistry {
        RemoteRegistry {
            provider,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Warms the in-memory cache from the store. Called once at startup.
    pub async fn load(&self) -> StoreResult<usize> {
        let stations = self.provider.get_remote_stations().await?;
        let mut entries = self.entries.write().await;
        for station in stations {
            let last_seen = station.last_seen.timestamp();
            entries.insert(
                station.station_id,
                Arc::new(RegistryEntry {
                    station,
                    last_seen_unix: AtomicI64::new(last_seen),
                    last_flush_unix: AtomicI64::new(last_seen),
                }),
            );
        }
        Ok(entries.len())
    }

    /// Registers (or re-registers) a remote station. An empty id mints a
    /// fresh UUID; a known id updates credentials in place and keeps its
    /// original `registered_at`.
    pub async fn register(&self, config: proto::RemoteStationConfig) -> StoreResult<Uuid> {
        let station_id = match Uuid::parse_str(&config.station_id) {
            Ok(id) => id,
            Err(_) => Uuid::new_v4(),
        };
        let now = Utc::now();
        let registered_at = {
            let entries = self.entries.read().await;
            entries
                .get(&station_id)
                .map(|entry| entry.station.registered_at)
                .unwrap_or(now)
        };
        let station = RemoteStation {
            station_id,
            station_name: config.station_name,
            station_type: config.station_type,
            aprs_enabled: config.aprs_enabled,
            aprs_callsign: config.aprs_callsign,
            wu_enabled: config.wu_enabled,
            wu_station_id: config.wu_station_id,
            wu_password: config.wu_password,
            pws_enabled: config.pws_enabled,
            pws_station_id: config.pws_station_id,
            pws_password: config.pws_password,
            aeris_enabled: config.aeris_enabled,
            aeris_api_client_id: config.aeris_api_client_id,
            aeris_api_client_secret: config.aeris_api_client_secret,
            latitude: config.latitude,
            longitude: config.longitude,
            altitude: config.altitude,
            registered_at,
            last_seen: now,
        };
        self.provider.register_remote_station(&station).await?;
        let mut entries = self.entries.write().await;
        entries.insert(
            station_id,
            Arc::new(RegistryEntry {
                station,
                last_seen_unix: AtomicI64::new(now.timestamp()),
                last_flush_unix: AtomicI64::new(now.timestamp()),
            }),
        );
        tracing::info!(station_id = %station_id, "remote station registered");
        Ok(station_id)
    }

    /// Marks a station as seen and returns its registration, or `None` for
    /// unknown ids. The hot path takes the read lock only; the durable
    /// flush happens at most once a minute per station.
    pub async fn touch(&self, station_id: Uuid) -> Option<RemoteStation> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(&station_id)?.clone()
        };
        let now = Utc::now().timestamp();
        entry.last_seen_unix.store(now, Ordering::Relaxed);

        let last_flush = entry.last_flush_unix.load(Ordering::Relaxed);
        if now - last_flush >= LAST_SEEN_FLUSH_SECS
            && entry
                .last_flush_unix
                .compare_exchange(last_flush, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            if let Some(when) = Utc.timestamp_opt(now, 0).single() {
                if let Err(err) = self
                    .provider
                    .update_remote_station_last_seen(station_id, when)
                    .await
                {
                    tracing::warn!(station_id = %station_id, error = %err, "last_seen flush failed");
                }
            }
        }
        Some(entry.station.clone())
    }

    /// Registrations with their live (unflushed) last-seen timestamps.
    pub async fn snapshot(&self) -> Vec<RemoteStation> {
        let entries = self.entries.read().await;
        let mut stations: Vec<RemoteStation> = entries
            .values()
            .map(|entry| {
                let mut station = entry.station.clone();
                if let Some(seen) = Utc
                    .timestamp_opt(entry.last_seen_unix.load(Ordering::Relaxed), 0)
                    .single()
                {
                    station.last_seen = seen;
                }
                station
            })
            .collect();
        stations.sort_by(|a, b| a.station_name.cmp(&b.station_name));
        stations
    }
}

/// Liveness bucket for the management API.
pub fn presence_status(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> &'static str {
    let age = now - last_seen;
    if age < chrono::Duration::minutes(5) {
        "online"
    } else if age < chrono::Duration::hours(1) {
        "stale"
    } else {
        "offline"
    }
}

/// Stamps and forwards one wire reading. Returns false when the reading
/// was dropped (missing or unknown station id).
pub async fn ingest_wire(
    registry: &RemoteRegistry,
    outlet: &DriverOutlet,
    wire: proto::WeatherReading,
) -> bool {
    let Ok(station_id) = Uuid::parse_str(&wire.station_id) else {
        tracing::warn!("dropping reading without a station id");
        return false;
    };
    let Some(station) = registry.touch(station_id).await else {
        tracing::warn!(station_id = %station_id, "dropping reading from unregistered station");
        return false;
    };
    let mut reading = Reading::from_wire(wire);
    reading.station_name = station.station_name;
    reading.station_type = station.station_type;
    reading.station_id = Some(station_id);
    outlet.emit(reading);
    true
}

pub struct WeatherService {
    registry: Arc<RemoteRegistry>,
    outlet: DriverOutlet,
}

impl WeatherService {
    pub fn new(registry: Arc<RemoteRegistry>, outlet: DriverOutlet) -> WeatherService {
        WeatherService { registry, outlet }
    }
}

#[tonic::async_trait]
impl WeatherV1 for WeatherService {
    async fn register_remote_station(
        &self,
        request: Request<proto::RemoteStationConfig>,
    ) -> Result<Response<proto::RegistrationAck>, Status> {
        let config = request.into_inner();
        if config.station_name.trim().is_empty() {
            return Err(Status::invalid_argument("station_name is required"));
        }
        let station_id = self
            .registry
            .register(config)
            .await
            .map_err(|err| Status::internal(format!("registration failed: {err}")))?;
        Ok(Response::new(proto::RegistrationAck {
            station_id: station_id.to_string(),
        }))
    }

    async fn send_weather_readings(
        &self,
        request: Request<Streaming<proto::WeatherReading>>,
    ) -> Result<Response<proto::Empty>, Status> {
        let mut stream = request.into_inner();
        loop {
            match stream.message().await {
                Ok(Some(wire)) => {
                    ingest_wire(&self.registry, &self.outlet, wire).await;
                }
                Ok(None) => break,
                Err(status) => {
                    tracing::debug!(error = %status, "inbound stream ended with error");
                    break;
                }
            }
        }
        Ok(Response::new(proto::Empty {}))
    }
}

/// Serves the receiver until cancellation. A bind failure is fatal to the
/// caller, matching the startup contract.
pub async fn serve(
    addr: SocketAddr,
    service: WeatherService,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!(%addr, "gRPC receiver listening");
    Server::builder()
        .add_service(WeatherV1Server::new(service))
        .serve_with_shutdown(addr, cancel.cancelled())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteProvider;
    use tokio::sync::mpsc;

    fn config(name: &str, id: &str) -> proto::RemoteStationConfig {
        proto::RemoteStationConfig {
            station_id: id.to_string(),
            station_name: name.to_string(),
            station_type: "davis".to_string(),
            aprs_enabled: true,
            aprs_callsign: "K0TEST".to_string(),
            ..Default::default()
        }
    }

    fn registry() -> RemoteRegistry {
        RemoteRegistry::new(Arc::new(SqliteProvider::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn empty_id_mints_and_persists_a_uuid() {
        let registry = registry();
        let id = registry.register(config("remote-a", "")).await.unwrap();

        let stations = registry.provider.get_remote_stations().await.unwrap();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].station_id, id);
        assert_eq!(stations[0].station_name, "remote-a");
        assert!(stations[0].aprs_enabled);
    }

    #[tokio::test]
    async fn reregistration_updates_in_place() {
        let registry = registry();
        let id = registry.register(config("remote-a", "")).await.unwrap();
        let first = registry.snapshot().await;
        let registered_at = first[0].registered_at;

        let mut again = config("remote-a", &id.to_string());
        again.aprs_callsign = "K0NEW".to_string();
        let same_id = registry.register(again).await.unwrap();
        assert_eq!(same_id, id);

        let stations = registry.provider.get_remote_stations().await.unwrap();
        assert_eq!(stations.len(), 1, "no duplicate rows");
        assert_eq!(stations[0].aprs_callsign, "K0NEW");
        let cached = registry.snapshot().await;
        assert_eq!(cached[0].registered_at, registered_at);
    }

    #[tokio::test]
    async fn readings_are_stamped_with_the_registered_name() {
        let registry = registry();
        let id = registry.register(config("remote-a", "")).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let outlet = DriverOutlet::new("grpc-receiver", tx);

        let mut wire = Reading::new("whatever-the-sender-said", "davis").to_wire();
        wire.station_id = id.to_string();
        wire.out_temp = 72.0;
        assert!(ingest_wire(&registry, &outlet, wire).await);

        let reading = rx.recv().await.unwrap();
        assert_eq!(reading.station_name, "remote-a");
        assert_eq!(reading.station_id, Some(id));
        assert_eq!(reading.out_temp, 72.0);
    }

    #[tokio::test]
    async fn unknown_or_missing_station_ids_are_dropped() {
        let registry = registry();
        let (tx, mut rx) = mpsc::channel(8);
        let outlet = DriverOutlet::new("grpc-receiver", tx);

        let wire = Reading::new("anon", "davis").to_wire();
        assert!(!ingest_wire(&registry, &outlet, wire).await);

        let mut wire = Reading::new("anon", "davis").to_wire();
        wire.station_id = Uuid::new_v4().to_string();
        assert!(!ingest_wire(&registry, &outlet, wire).await);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn last_seen_flush_is_debounced() {
        let registry = registry();
        let id = registry.register(config("remote-a", "")).await.unwrap();
        let stored = registry.provider.get_remote_stations().await.unwrap()[0].last_seen;

        // Touches inside the debounce window update memory, not the store.
        registry.touch(id).await.unwrap();
        registry.touch(id).await.unwrap();
        let after = registry.provider.get_remote_stations().await.unwrap()[0].last_seen;
        assert_eq!(stored.timestamp(), after.timestamp());
    }

    #[test]
    fn presence_buckets() {
        let now = Utc::now();
        assert_eq!(presence_status(now - chrono::Duration::seconds(30), now), "online");
        assert_eq!(presence_status(now - chrono::Duration::minutes(30), now), "stale");
        assert_eq!(presence_status(now - chrono::Duration::hours(2), now), "offline");
    }
}
