//! Read-memoizing wrapper around a [`ConfigProvider`]. Reads hit the inner
//! store once and are served from memory until any mutator runs; mutators
//! hold the cache write lock across the inner call so a concurrent read can
//! never re-fill the cache with pre-mutation data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ConfigProvider, ConfigTree, ControllerConfig, DeviceConfig, RemoteStation, SinkHealth,
    SnowTotals, StorageConfig, StoreResult, SunTimes,
};

#[derive(Default)]
struct CacheState {
    devices: Option<Vec<DeviceConfig>>,
    storage: Option<Vec<StorageConfig>>,
    controllers: Option<Vec<ControllerConfig>>,
    remote_stations: Option<Vec<RemoteStation>>,
}

impl CacheState {
    fn clear(&mut self) {
        *self = CacheState::default();
    }
}

pub struct CachedProvider<P> {
    inner: P,
    cache: RwLock<CacheState>,
}

impl<P: ConfigProvider> CachedProvider<P> {
    pub fn new(inner: P) -> CachedProvider<P> {
        CachedProvider {
            inner,
            cache: RwLock::new(CacheState::default()),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: ConfigProvider> ConfigProvider for CachedProvider<P> {
    async fn load_config(&self) -> StoreResult<ConfigTree> {
        let mut cache = self.cache.write().await;
        let tree = self.inner.load_config().await?;
        cache.devices = Some(tree.devices.clone());
        cache.storage = Some(tree.storage.clone());
        cache.controllers = Some(tree.controllers.clone());
        Ok(tree)
    }

    async fn get_devices(&self) -> StoreResult<Vec<DeviceConfig>> {
        if let Some(devices) = &self.cache.read().await.devices {
            return Ok(devices.clone());
        }
        let mut cache = self.cache.write().await;
        if let Some(devices) = &cache.devices {
            return Ok(devices.clone());
        }
        let devices = self.inner.get_devices().await?;
        cache.devices = Some(devices.clone());
        Ok(devices)
    }

    async fn get_storage_configs(&self) -> StoreResult<Vec<StorageConfig>> {
        if let Some(storage) = &self.cache.read().await.storage {
            return Ok(storage.clone());
        }
        let mut cache = self.cache.write().await;
        if let Some(storage) = &cache.storage {
            return Ok(storage.clone());
        }
        let storage = self.inner.get_storage_configs().await?;
        cache.storage = Some(storage.clone());
        Ok(storage)
    }

    async fn get_controllers(&self) -> StoreResult<Vec<ControllerConfig>> {
        if let Some(controllers) = &self.cache.read().await.controllers {
            return Ok(controllers.clone());
        }
        let mut cache = self.cache.write().await;
        if let Some(controllers) = &cache.controllers {
            return Ok(controllers.clone());
        }
        let controllers = self.inner.get_controllers().await?;
        cache.controllers = Some(controllers.clone());
        Ok(controllers)
    }

    async fn update_device(&self, device: &DeviceConfig) -> StoreResult<()> {
        let mut cache = self.cache.write().await;
        self.inner.update_device(device).await?;
        cache.clear();
        Ok(())
    }

    async fn update_controller(&self, controller: &ControllerConfig) -> StoreResult<()> {
        let mut cache = self.cache.write().await;
        self.inner.update_controller(controller).await?;
        cache.clear();
        Ok(())
    }

    async fn register_remote_station(&self, station: &RemoteStation) -> StoreResult<()> {
        let mut cache = self.cache.write().await;
        self.inner.register_remote_station(station).await?;
        cache.clear();
        Ok(())
    }

    async fn get_remote_stations(&self) -> StoreResult<Vec<RemoteStation>> {
        if let Some(stations) = &self.cache.read().await.remote_stations {
            return Ok(stations.clone());
        }
        let mut cache = self.cache.write().await;
        if let Some(stations) = &cache.remote_stations {
            return Ok(stations.clone());
        }
        let stations = self.inner.get_remote_stations().await?;
        cache.remote_stations = Some(stations.clone());
        Ok(stations)
    }

    async fn update_remote_station_last_seen(
        &self,
        station_id: Uuid,
        last_seen: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut cache = self.cache.write().await;
        self.inner
            .update_remote_station_last_seen(station_id, last_seen)
            .await?;
        cache.remote_stations = None;
        Ok(())
    }

    async fn update_storage_health(&self, name: &str, health: &SinkHealth) -> StoreResult<()> {
        let mut cache = self.cache.write().await;
        self.inner.update_storage_health(name, health).await?;
        cache.storage = None;
        Ok(())
    }

    async fn get_snow_totals(&self, station_name: &str) -> StoreResult<Option<SnowTotals>> {
        // Freshness-sensitive; never cached.
        self.inner.get_snow_totals(station_name).await
    }

    async fn upsert_snow_totals(&self, totals: &SnowTotals) -> StoreResult<()> {
        self.inner.upsert_snow_totals(totals).await
    }

    async fn get_sun_times(
        &self,
        latitude: f64,
        longitude: f64,
        day: chrono::NaiveDate,
    ) -> StoreResult<Option<SunTimes>> {
        // Day-keyed and read rarely; not worth a memo slot.
        self.inner.get_sun_times(latitude, longitude, day).await
    }

    async fn upsert_sun_times(&self, times: &SunTimes) -> StoreResult<()> {
        self.inner.upsert_sun_times(times).await
    }
}
