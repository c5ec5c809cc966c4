use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use weather_core::api::{self, AppState};
use weather_core::bus::ReadingBus;
use weather_core::config::Config;
use weather_core::controllers::ControllerCtx;
use weather_core::drivers::DriverOutlet;
use weather_core::managers::{ControllerManager, StationManager, StorageManager};
use weather_core::model::StationKind;
use weather_core::receiver::{self, RemoteRegistry, WeatherService};
use weather_core::snow::SnowCacheJob;
use weather_core::store::{
    CachedProvider, ConfigProvider, OverlayProvider, SqliteProvider, StorageBackendConfig,
    StorageConfig,
};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,weather_core=info")),
        )
        .init();
}

/// Seeds storage rows from the environment so a fresh install comes up
/// with its sinks without touching SQL by hand.
async fn seed_storage_from_env(store: &SqliteProvider, config: &Config) -> Result<()> {
    if let Some(dsn) = &config.timescaledb_dsn {
        store
            .ensure_storage_config(&StorageConfig {
                name: "timescaledb".to_string(),
                enabled: true,
                backend: StorageBackendConfig::TimescaleDb { dsn: dsn.clone() },
                health: None,
            })
            .await?;
    }
    if let Some(endpoint) = &config.grpc_endpoint {
        store
            .ensure_storage_config(&StorageConfig {
                name: "grpc".to_string(),
                enabled: true,
                backend: StorageBackendConfig::Grpc {
                    endpoint: endpoint.clone(),
                    tls_cert: None,
                    tls_key: None,
                },
                health: None,
            })
            .await?;
    }
    if let Some(server) = &config.aprs_server {
        store
            .ensure_storage_config(&StorageConfig {
                name: "aprs".to_string(),
                enabled: true,
                backend: StorageBackendConfig::Aprs {
                    server: server.clone(),
                },
                health: None,
            })
            .await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Config::from_env()?;

    // An unusable config store is fatal: nothing can run without it.
    let store = SqliteProvider::open(&config.config_db_path)
        .with_context(|| format!("opening config store at {:?}", config.config_db_path))?;
    seed_storage_from_env(&store, &config).await?;
    let cached: Arc<dyn ConfigProvider> = Arc::new(CachedProvider::new(store));
    let overlay: Arc<dyn ConfigProvider> = Arc::new(OverlayProvider::new(cached.clone()));

    let cancel = CancellationToken::new();
    let bus = Arc::new(ReadingBus::new());
    let _distributor = bus.start(cancel.child_token());

    let reader_slot = Arc::new(tokio::sync::RwLock::new(None));
    let stations = Arc::new(StationManager::new(bus.clone(), cancel.child_token()));
    let storage = Arc::new(StorageManager::new(
        bus.clone(),
        overlay.clone(),
        reader_slot.clone(),
        cancel.child_token(),
    ));
    let controller_ctx = ControllerCtx::new(overlay.clone(), reader_slot.clone())?;
    let controllers = Arc::new(ControllerManager::new(controller_ctx, cancel.child_token()));

    let tree = cached
        .load_config()
        .await
        .context("loading initial configuration")?;
    let mut report = storage.reload_config(&tree.storage).await;
    report.merge(stations.reload_config(&tree.devices).await);
    report.merge(controllers.reload_config(&tree.controllers).await);
    for error in &report.errors {
        tracing::warn!(%error, "initial start-up error");
    }
    tracing::info!(
        stations = report.added.len(),
        sinks = storage.sink_names().await.len(),
        "initial configuration applied"
    );

    let registry = Arc::new(RemoteRegistry::new(cached.clone()));
    let known = registry.load().await.context("loading remote stations")?;
    tracing::info!(known, "remote-station registry warmed");

    // The receiver listens when an enabled grpcreceiver device exists; its
    // streams feed the same bus as the local drivers.
    let receiver_handle = tree
        .devices
        .iter()
        .find(|d| d.enabled && d.kind() == Some(StationKind::GrpcReceiver))
        .map(|device| {
            let port = device.port.unwrap_or(50051);
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let outlet = DriverOutlet::new(&device.name, bus.sender());
            let service = WeatherService::new(registry.clone(), outlet);
            let receiver_cancel = cancel.child_token();
            tokio::spawn(
                async move { receiver::serve(addr, service, receiver_cancel).await },
            )
        });

    SnowCacheJob::new(overlay.clone(), reader_slot.clone()).start(cancel.child_token());

    let state = AppState {
        provider: overlay.clone(),
        registry: registry.clone(),
        reader: reader_slot.clone(),
        bus: bus.clone(),
        stations: stations.clone(),
        storage: storage.clone(),
        controllers: controllers.clone(),
        api_token: config.api_token.clone(),
    };
    let app = api::router(state);
    let listener = TcpListener::bind(&config.http_listen)
        .await
        .with_context(|| format!("binding management api on {}", config.http_listen))?;
    tracing::info!(listen = %config.http_listen, "management api listening");
    let http_cancel = cancel.child_token();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { http_cancel.cancelled().await })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        result = async {
            match receiver_handle {
                Some(handle) => handle.await,
                None => futures::future::pending().await,
            }
        } => {
            // A receiver that cannot serve (bind failure) is fatal.
            match result {
                Ok(Ok(())) => tracing::info!("gRPC receiver exited"),
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "gRPC receiver failed");
                    anyhow::bail!("gRPC receiver failed: {err:#}");
                }
                Err(err) => {
                    tracing::error!(error = %err, "gRPC receiver task failed");
                    anyhow::bail!("gRPC receiver task failed: {err}");
                }
            }
        }
        result = http_handle => {
            match result {
                Ok(Ok(())) => tracing::info!("management api exited"),
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "management api failed");
                    anyhow::bail!("management api failed: {err}");
                }
                Err(err) => anyhow::bail!("management api task failed: {err}"),
            }
        }
    }

    cancel.cancel();
    controllers.stop_all().await;
    stations.stop_all().await;
    storage.stop_all().await;
    tracing::info!("weather-core stopped");
    Ok(())
}
