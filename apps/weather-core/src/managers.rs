//! Lifecycle managers for stations, storage sinks, and upload controllers.
//! All three share one pattern: a named map of running instances and a
//! `reload_config` that diffs the desired configuration against the map,
//! then starts, stops, or restarts entries. A failure on one entry never
//! aborts the rest of the reload; errors accumulate into the report.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::bus::ReadingBus;
use crate::controllers::aeris::AerisController;
use crate::controllers::pwsweather::PwsWeatherController;
use crate::controllers::wunderground::WundergroundController;
use crate::controllers::{Controller, ControllerCtx};
use crate::drivers::{build_driver, StationDriver};
use crate::model::StationKind;
use crate::sinks::aprs::AprsSink;
use crate::sinks::grpc::GrpcSink;
use crate::sinks::timescale::{TimescaleReader, TimescaleSink};
use crate::sinks::StorageBackend;
use crate::store::{
    ConfigProvider, ControllerConfig, ControllerKind, DeviceConfig, StorageBackendConfig,
    StorageConfig,
};

/// What a reload actually did. An identical configuration applied twice
/// yields an all-zero report on the second pass.
#[derive(Debug, Default, PartialEq)]
pub struct ReloadReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub restarted: Vec<String>,
    pub errors: Vec<String>,
}

impl ReloadReport {
    pub fn operations(&self) -> usize {
        self.added.len() + self.removed.len() + self.restarted.len()
    }

    pub fn is_noop(&self) -> bool {
        self.operations() == 0 && self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ReloadReport) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.restarted.extend(other.restarted);
        self.errors.extend(other.errors);
    }
}

struct StationEntry {
    config: DeviceConfig,
    driver: Box<dyn StationDriver>,
}

pub struct StationManager {
    bus: Arc<ReadingBus>,
    cancel: CancellationToken,
    stations: RwLock<HashMap<String, StationEntry>>,
}

impl StationManager {
    pub fn new(bus: Arc<ReadingBus>, cancel: CancellationToken) -> StationManager {
        StationManager {
            bus,
            cancel,
            stations: RwLock::new(HashMap::new()),
        }
    }

    pub async fn station_names(&self) -> Vec<String> {
        self.stations.read().await.keys().cloned().collect()
    }

    pub async fn has_station(&self, name: &str) -> bool {
        self.stations.read().await.contains_key(name)
    }

    /// Diffs the device list against the running drivers. Receiver-type
    /// rows are skipped: inbound gRPC stations are the registry's job.
    pub async fn reload_config(&self, devices: &[DeviceConfig]) -> ReloadReport {
        let mut report = ReloadReport::default();
        let desired: HashMap<String, DeviceConfig> = devices
            .iter()
            .filter(|d| d.enabled && d.kind() != Some(StationKind::GrpcReceiver))
            .map(|d| (d.name.clone(), d.clone()))
            .collect();

        let mut stations = self.stations.write().await;

        let running: HashSet<String> = stations.keys().cloned().collect();
        let wanted: HashSet<String> = desired.keys().cloned().collect();
        for name in running.difference(&wanted) {
            if let Some(mut entry) = stations.remove(name) {
                if let Err(err) = entry.driver.stop().await {
                    report.errors.push(format!("stopping {name}: {err:#}"));
                }
                report.removed.push(name.clone());
                tracing::info!(station = %name, "station stopped");
            }
        }

        for (name, config) in desired {
            let unchanged = stations
                .get(&name)
                .map(|entry| entry.config == config);
            match unchanged {
                Some(true) => {}
                Some(false) => {
                    let mut entry = stations.remove(&name).expect("entry present");
                    if let Err(err) = entry.driver.stop().await {
                        report.errors.push(format!("stopping {name}: {err:#}"));
                    }
                    match self.start_driver(&config).await {
                        Ok(driver) => {
                            stations.insert(name.clone(), StationEntry { config, driver });
                            report.restarted.push(name.clone());
                            tracing::info!(station = %name, "station restarted");
                        }
                        Err(err) => {
                            report.errors.push(format!("restarting {name}: {err:#}"));
                        }
                    }
                }
                None => match self.start_driver(&config).await {
                    Ok(driver) => {
                        tracing::info!(station = %name, kind = %config.kind_tag, "station started");
                        stations.insert(name.clone(), StationEntry { config, driver });
                        report.added.push(name);
                    }
                    Err(err) => {
                        report.errors.push(format!("starting {name}: {err:#}"));
                    }
                },
            }
        }
        report
    }

    async fn start_driver(&self, config: &DeviceConfig) -> anyhow::Result<Box<dyn StationDriver>> {
        let mut driver = build_driver(config, self.bus.sender(), self.cancel.child_token())?;
        driver.start().await?;
        Ok(driver)
    }

    pub async fn stop_all(&self) {
        let mut stations = self.stations.write().await;
        for (name, mut entry) in stations.drain() {
            if let Err(err) = entry.driver.stop().await {
                tracing::warn!(station = %name, error = %err, "stop failed");
            }
        }
    }
}

struct SinkEntry {
    config: StorageConfig,
    backend: Box<dyn StorageBackend>,
}

pub struct StorageManager {
    bus: Arc<ReadingBus>,
    provider: Arc<dyn ConfigProvider>,
    reader_slot: Arc<RwLock<Option<TimescaleReader>>>,
    cancel: CancellationToken,
    sinks: RwLock<HashMap<String, SinkEntry>>,
}

/// Health probe results change constantly; only identity, enablement, and
/// backend parameters decide whether a sink restarts.
fn storage_changed(current: &StorageConfig, desired: &StorageConfig) -> bool {
    current.enabled != desired.enabled || current.backend != desired.backend
}

impl StorageManager {
    pub fn new(
        bus: Arc<ReadingBus>,
        provider: Arc<dyn ConfigProvider>,
        reader_slot: Arc<RwLock<Option<TimescaleReader>>>,
        cancel: CancellationToken,
    ) -> StorageManager {
        StorageManager {
            bus,
            provider,
            reader_slot,
            cancel,
            sinks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn sink_names(&self) -> Vec<String> {
        self.sinks.read().await.keys().cloned().collect()
    }

    fn build_backend(&self, config: &StorageConfig) -> Box<dyn StorageBackend> {
        match &config.backend {
            StorageBackendConfig::TimescaleDb { dsn } => Box::new(TimescaleSink::new(
                config.name.clone(),
                dsn.clone(),
                self.provider.clone(),
                self.reader_slot.clone(),
            )),
            StorageBackendConfig::Grpc {
                endpoint,
                tls_cert,
                tls_key,
            } => Box::new(GrpcSink::new(
                config.name.clone(),
                endpoint.clone(),
                tls_cert.clone(),
                tls_key.clone(),
                self.provider.clone(),
            )),
            StorageBackendConfig::Aprs { server } => Box::new(AprsSink::new(
                config.name.clone(),
                server.clone(),
                self.provider.clone(),
            )),
        }
    }

    async fn start_sink(&self, config: &StorageConfig) -> anyhow::Result<Box<dyn StorageBackend>> {
        let mut backend = self.build_backend(config);
        let inbox = backend.start(self.cancel.child_token()).await?;
        self.bus.add_sink(&config.name, inbox).await;
        Ok(backend)
    }

    async fn stop_sink(&self, name: &str, mut entry: SinkEntry) -> anyhow::Result<()> {
        // Deregistering first closes the inbox so the writer drains out.
        self.bus.remove_sink(name).await;
        entry.backend.stop().await
    }

    pub async fn reload_config(&self, configs: &[StorageConfig]) -> ReloadReport {
        let mut report = ReloadReport::default();
        let desired: HashMap<String, StorageConfig> = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| (c.name.clone(), c.clone()))
            .collect();

        let mut sinks = self.sinks.write().await;

        let running: HashSet<String> = sinks.keys().cloned().collect();
        let wanted: HashSet<String> = desired.keys().cloned().collect();
        for name in running.difference(&wanted) {
            if let Some(entry) = sinks.remove(name) {
                if let Err(err) = self.stop_sink(name, entry).await {
                    report.errors.push(format!("stopping {name}: {err:#}"));
                }
                report.removed.push(name.clone());
                tracing::info!(sink = %name, "sink stopped");
            }
        }

        for (name, config) in desired {
            let unchanged = sinks
                .get(&name)
                .map(|entry| !storage_changed(&entry.config, &config));
            match unchanged {
                Some(true) => {}
                Some(false) => {
                    let entry = sinks.remove(&name).expect("entry present");
                    if let Err(err) = self.stop_sink(&name, entry).await {
                        report.errors.push(format!("stopping {name}: {err:#}"));
                    }
                    match self.start_sink(&config).await {
                        Ok(backend) => {
                            sinks.insert(name.clone(), SinkEntry { config, backend });
                            report.restarted.push(name.clone());
                            tracing::info!(sink = %name, "sink restarted");
                        }
                        Err(err) => {
                            report.errors.push(format!("restarting {name}: {err:#}"));
                        }
                    }
                }
                None => match self.start_sink(&config).await {
                    Ok(backend) => {
                        tracing::info!(sink = %name, backend = config.backend.backend_tag(), "sink started");
                        sinks.insert(name.clone(), SinkEntry { config, backend });
                        report.added.push(name);
                    }
                    Err(err) => {
                        report.errors.push(format!("starting {name}: {err:#}"));
                    }
                },
            }
        }
        report
    }

    pub async fn stop_all(&self) {
        let mut sinks = self.sinks.write().await;
        let names: Vec<String> = sinks.keys().cloned().collect();
        for name in names {
            if let Some(entry) = sinks.remove(&name) {
                if let Err(err) = self.stop_sink(&name, entry).await {
                    tracing::warn!(sink = %name, error = %err, "stop failed");
                }
            }
        }
    }
}

struct ControllerEntry {
    config: ControllerConfig,
    controller: Box<dyn Controller>,
}

/// At most one controller instance per type: the map key is the kind.
pub struct ControllerManager {
    ctx: ControllerCtx,
    cancel: CancellationToken,
    controllers: RwLock<HashMap<ControllerKind, ControllerEntry>>,
}

impl ControllerManager {
    pub fn new(ctx: ControllerCtx, cancel: CancellationToken) -> ControllerManager {
        ControllerManager {
            ctx,
            cancel,
            controllers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn controller_kinds(&self) -> Vec<ControllerKind> {
        self.controllers.read().await.keys().copied().collect()
    }

    fn build_controller(&self, config: &ControllerConfig) -> Box<dyn Controller> {
        let cancel = self.cancel.child_token();
        match config.kind {
            ControllerKind::Wunderground => {
                Box::new(WundergroundController::new(self.ctx.clone(), cancel))
            }
            ControllerKind::PwsWeather => {
                Box::new(PwsWeatherController::new(self.ctx.clone(), cancel))
            }
            ControllerKind::Aeris => Box::new(AerisController::new(
                self.ctx.clone(),
                config.endpoint.clone(),
                config.fetch_interval_secs,
                cancel,
            )),
        }
    }

    pub async fn reload_config(&self, configs: &[ControllerConfig]) -> ReloadReport {
        let mut report = ReloadReport::default();
        let desired: HashMap<ControllerKind, ControllerConfig> = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| (c.kind, c.clone()))
            .collect();

        let mut controllers = self.controllers.write().await;

        let running: Vec<ControllerKind> = controllers.keys().copied().collect();
        for kind in running {
            if !desired.contains_key(&kind) {
                if let Some(mut entry) = controllers.remove(&kind) {
                    if let Err(err) = entry.controller.stop().await {
                        report
                            .errors
                            .push(format!("stopping {}: {err:#}", kind.as_tag()));
                    }
                    report.removed.push(kind.as_tag().to_string());
                    tracing::info!(controller = kind.as_tag(), "controller stopped");
                }
            }
        }

        for (kind, config) in desired {
            let unchanged = controllers
                .get(&kind)
                .map(|entry| entry.config == config);
            match unchanged {
                Some(true) => {}
                Some(false) => {
                    let mut entry = controllers.remove(&kind).expect("entry present");
                    if let Err(err) = entry.controller.stop().await {
                        report
                            .errors
                            .push(format!("stopping {}: {err:#}", kind.as_tag()));
                    }
                    let mut controller = self.build_controller(&config);
                    match controller.start().await {
                        Ok(()) => {
                            controllers.insert(kind, ControllerEntry { config, controller });
                            report.restarted.push(kind.as_tag().to_string());
                            tracing::info!(controller = kind.as_tag(), "controller restarted");
                        }
                        Err(err) => {
                            report
                                .errors
                                .push(format!("restarting {}: {err:#}", kind.as_tag()));
                        }
                    }
                }
                None => {
                    let mut controller = self.build_controller(&config);
                    match controller.start().await {
                        Ok(()) => {
                            tracing::info!(controller = kind.as_tag(), "controller started");
                            controllers.insert(kind, ControllerEntry { config, controller });
                            report.added.push(kind.as_tag().to_string());
                        }
                        Err(err) => {
                            report
                                .errors
                                .push(format!("starting {}: {err:#}", kind.as_tag()));
                        }
                    }
                }
            }
        }
        report
    }

    pub async fn stop_all(&self) {
        let mut controllers = self.controllers.write().await;
        for (kind, mut entry) in controllers.drain() {
            if let Err(err) = entry.controller.stop().await {
                tracing::warn!(controller = kind.as_tag(), error = %err, "stop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteProvider;

    fn davis(name: &str, port: u16) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            kind_tag: "davis".to_string(),
            enabled: true,
            hostname: Some("127.0.0.1".to_string()),
            port: Some(port),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn station_reload_is_idempotent() {
        let bus = Arc::new(ReadingBus::new());
        let manager = StationManager::new(bus, CancellationToken::new());

        let devices = vec![davis("a", 10001), davis("b", 10002)];
        let first = manager.reload_config(&devices).await;
        assert_eq!(first.added.len(), 2, "{first:?}");
        assert!(first.errors.is_empty());

        let second = manager.reload_config(&devices).await;
        assert!(second.is_noop(), "{second:?}");

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn station_reload_applies_add_remove_change() {
        let bus = Arc::new(ReadingBus::new());
        let manager = StationManager::new(bus, CancellationToken::new());

        manager
            .reload_config(&[davis("a", 10001), davis("b", 10002)])
            .await;

        // Drop b, change a's port, add c.
        let mut changed_a = davis("a", 10001);
        changed_a.port = Some(4444);
        let report = manager
            .reload_config(&[changed_a, davis("c", 10003)])
            .await;
        assert_eq!(report.added, vec!["c".to_string()]);
        assert_eq!(report.removed, vec!["b".to_string()]);
        assert_eq!(report.restarted, vec!["a".to_string()]);

        let mut names = manager.station_names().await;
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "c".to_string()]);

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn disabled_and_receiver_devices_never_start() {
        let bus = Arc::new(ReadingBus::new());
        let manager = StationManager::new(bus, CancellationToken::new());

        let mut disabled = davis("off", 10001);
        disabled.enabled = false;
        let receiver = DeviceConfig {
            name: "ingest".to_string(),
            kind_tag: "grpcreceiver".to_string(),
            enabled: true,
            port: Some(50051),
            ..Default::default()
        };
        let report = manager.reload_config(&[disabled, receiver]).await;
        assert!(report.is_noop(), "{report:?}");
        assert!(manager.station_names().await.is_empty());
    }

    #[tokio::test]
    async fn storage_reload_removes_sink_and_closes_inbox() {
        let bus = Arc::new(ReadingBus::new());
        let provider: Arc<dyn ConfigProvider> =
            Arc::new(SqliteProvider::open_in_memory().unwrap());
        let reader_slot = Arc::new(RwLock::new(None));
        let manager = StorageManager::new(
            bus.clone(),
            provider,
            reader_slot,
            CancellationToken::new(),
        );

        let aprs = StorageConfig {
            name: "aprs".to_string(),
            enabled: true,
            backend: StorageBackendConfig::Aprs {
                server: "127.0.0.1:14580".to_string(),
            },
            health: None,
        };
        let report = manager.reload_config(std::slice::from_ref(&aprs)).await;
        assert_eq!(report.added, vec!["aprs".to_string()]);
        assert_eq!(bus.sink_names().await, vec!["aprs".to_string()]);

        // Health updates must not count as a config change.
        let mut with_health = aprs.clone();
        with_health.health = Some(crate::store::SinkHealth::healthy("ok"));
        let report = manager.reload_config(&[with_health]).await;
        assert!(report.is_noop(), "{report:?}");

        let report = manager.reload_config(&[]).await;
        assert_eq!(report.removed, vec!["aprs".to_string()]);
        assert!(bus.sink_names().await.is_empty());
    }

    #[tokio::test]
    async fn controller_manager_keeps_one_instance_per_kind() {
        let provider: Arc<dyn ConfigProvider> =
            Arc::new(SqliteProvider::open_in_memory().unwrap());
        let reader_slot = Arc::new(RwLock::new(None));
        let ctx = ControllerCtx::new(provider, reader_slot).unwrap();
        let manager = ControllerManager::new(ctx, CancellationToken::new());

        let config = ControllerConfig {
            kind: ControllerKind::Wunderground,
            enabled: true,
            endpoint: None,
            fetch_interval_secs: None,
        };
        let report = manager
            .reload_config(&[config.clone(), config.clone()])
            .await;
        assert_eq!(report.added.len(), 1);
        assert_eq!(manager.controller_kinds().await.len(), 1);

        let second = manager.reload_config(&[config]).await;
        assert!(second.is_noop(), "{second:?}");

        manager.stop_all().await;
    }
}
