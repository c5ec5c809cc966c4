//! Virtual-device projection. Wraps a provider so that every registered
//! remote station shows up in `get_devices` as if it were configured
//! locally; upload controllers and the REST layer never learn the
//! difference. Local device names win on collision.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    ConfigProvider, ConfigTree, ControllerConfig, DeviceConfig, RemoteStation, SinkHealth,
    SnowTotals, StorageConfig, StoreResult, SunTimes,
};

pub struct OverlayProvider {
    inner: Arc<dyn ConfigProvider>,
}

impl OverlayProvider {
    pub fn new(inner: Arc<dyn ConfigProvider>) -> OverlayProvider {
        OverlayProvider { inner }
    }
}

#[async_trait]
impl ConfigProvider for OverlayProvider {
    async fn load_config(&self) -> StoreResult<ConfigTree> {
        self.inner.load_config().await
    }

    async fn get_devices(&self) -> StoreResult<Vec<DeviceConfig>> {
        let mut devices = self.inner.get_devices().await?;
        let local_names: HashSet<String> = devices.iter().map(|d| d.name.clone()).collect();
        for remote in self.inner.get_remote_stations().await? {
            if local_names.contains(&remote.station_name) {
                tracing::debug!(
                    station = %remote.station_name,
                    "remote station shadowed by local device of the same name"
                );
                continue;
            }
            devices.push(remote.as_virtual_device());
        }
        Ok(devices)
    }

    async fn get_storage_configs(&self) -> StoreResult<Vec<StorageConfig>> {
        self.inner.get_storage_configs().await
    }

    async fn get_controllers(&self) -> StoreResult<Vec<ControllerConfig>> {
        self.inner.get_controllers().await
    }

    async fn update_device(&self, device: &DeviceConfig) -> StoreResult<()> {
        self.inner.update_device(device).await
    }

    async fn update_controller(&self, controller: &ControllerConfig) -> StoreResult<()> {
        self.inner.update_controller(controller).await
    }

    async fn register_remote_station(&self, station: &RemoteStation) -> StoreResult<()> {
        self.inner.register_remote_station(station).await
    }

    async fn get_remote_stations(&self) -> StoreResult<Vec<RemoteStation>> {
        self.inner.get_remote_stations().await
    }

    async fn update_remote_station_last_seen(
        &self,
        station_id: Uuid,
        last_seen: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.inner
            .update_remote_station_last_seen(station_id, last_seen)
            .await
    }

    async fn update_storage_health(&self, name: &str, health: &SinkHealth) -> StoreResult<()> {
        self.inner.update_storage_health(name, health).await
    }

    async fn get_snow_totals(&self, station_name: &str) -> StoreResult<Option<SnowTotals>> {
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
        self.inner.get_sun_times(latitude, longitude, day).await
    }

    async fn upsert_sun_times(&self, times: &SunTimes) -> StoreResult<()> {
        self.inner.upsert_sun_times(times).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::SqliteProvider;
    use super::*;
    use crate::model::CapabilitySet;

    #[tokio::test]
    async fn remote_stations_appear_as_devices() {
        let store = Arc::new(SqliteProvider::open_in_memory().unwrap());
        let now = Utc::now();
        store
            .register_remote_station(&RemoteStation {
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
                latitude: 0.0,
                longitude: 0.0,
                altitude: 0.0,
                registered_at: now,
                last_seen: now,
            })
            .await
            .unwrap();

        let overlay = OverlayProvider::new(store);
        let devices = overlay.get_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "remote-a");
        assert!(devices[0].capabilities().contains(CapabilitySet::WEATHER));
        assert!(devices[0].aprs.enabled);
    }
}
