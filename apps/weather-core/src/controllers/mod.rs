//! Upload controllers. Each one periodically pushes (or, for Aeris, pulls)
//! per-station state against a third-party weather network. Controllers
//! read the latest state from the time-series store and never touch the
//! live distribution bus. Every upload path is gated on the station's
//! capability set and per-service credentials.

pub mod aeris;
pub mod pwsweather;
pub mod wunderground;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::CapabilitySet;
use crate::sinks::timescale::TimescaleReader;
use crate::store::{ConfigProvider, ControllerKind, DeviceConfig};

/// How long `stop()` waits for per-device tickers before abandoning them.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Controller: Send + Sync {
    fn kind(&self) -> ControllerKind;
    async fn start(&mut self) -> anyhow::Result<()>;
    async fn stop(&mut self) -> anyhow::Result<()>;
}

/// Shared plumbing handed to every controller: the (overlaid) config
/// provider, the time-series read handle, and one HTTP client.
#[derive(Clone)]
pub struct ControllerCtx {
    pub provider: Arc<dyn ConfigProvider>,
    pub reader: Arc<RwLock<Option<TimescaleReader>>>,
    pub http: reqwest::Client,
}

impl ControllerCtx {
    pub fn new(
        provider: Arc<dyn ConfigProvider>,
        reader: Arc<RwLock<Option<TimescaleReader>>>,
    ) -> anyhow::Result<ControllerCtx> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(ControllerCtx {
            provider,
            reader,
            http,
        })
    }

    /// Fresh device row by name, or `None` when the station has left the
    /// configuration since the ticker spawned.
    pub async fn lookup_device(&self, name: &str) -> Option<DeviceConfig> {
        match self.provider.get_devices().await {
            Ok(devices) => devices.into_iter().find(|d| d.name == name),
            Err(err) => {
                tracing::warn!(station = name, error = %err, "device lookup failed");
                None
            }
        }
    }
}

/// Start of the current local day, in UTC.
pub fn local_midnight() -> DateTime<Utc> {
    let today = Local::now().date_naive();
    Local
        .from_local_datetime(&today.and_hms_opt(0, 0, 0).expect("midnight exists"))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Daily rainfall recomputed from per-packet increments in the current
/// local day. Gated on the Weather capability: snow gauges and air-quality
/// monitors report zero rain no matter what their rows contain.
pub async fn rainfall_since_midnight(
    reader: &TimescaleReader,
    device: &DeviceConfig,
) -> anyhow::Result<f64> {
    if !device.capabilities().contains(CapabilitySet::WEATHER) {
        return Ok(0.0);
    }
    reader
        .rainfall_since(&device.name, local_midnight())
        .await
}

/// Joins a set of per-device tickers, abandoning stragglers after the stop
/// timeout.
pub(crate) async fn join_tickers(kind: ControllerKind, handles: &mut Vec<JoinHandle<()>>) {
    for handle in handles.drain(..) {
        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(controller = kind.as_tag(), error = %err, "ticker panicked")
            }
            Err(_) => {
                tracing::warn!(
                    controller = kind.as_tag(),
                    "ticker did not stop within timeout, abandoning"
                );
            }
        }
    }
}

/// Skip-or-proceed decision shared by the push controllers, factored out
/// so the gate is testable without network plumbing.
pub fn upload_allowed(device: Option<&DeviceConfig>) -> UploadGate {
    let Some(device) = device else {
        return UploadGate::StationGone;
    };
    if !device.capabilities().contains(CapabilitySet::WEATHER) {
        return UploadGate::NotWeatherCapable;
    }
    UploadGate::Allowed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadGate {
    Allowed,
    StationGone,
    NotWeatherCapable,
}

pub(crate) fn spawn_device_ticker<F, Fut>(
    kind: ControllerKind,
    station: String,
    interval: Duration,
    cancel: CancellationToken,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(String) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would upload stale state on reload.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => tick(station.clone()).await,
            }
        }
        tracing::debug!(controller = kind.as_tag(), station = %station, "ticker exited");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CapabilitySet;

    #[test]
    fn gate_rejects_missing_and_non_weather_stations() {
        assert_eq!(upload_allowed(None), UploadGate::StationGone);

        let snow = DeviceConfig {
            name: "gauge".to_string(),
            kind_tag: "snowgauge".to_string(),
            ..Default::default()
        };
        assert_eq!(upload_allowed(Some(&snow)), UploadGate::NotWeatherCapable);

        let air = DeviceConfig {
            name: "office".to_string(),
            kind_tag: "airgradient".to_string(),
            ..Default::default()
        };
        assert_eq!(upload_allowed(Some(&air)), UploadGate::NotWeatherCapable);

        let davis = DeviceConfig {
            name: "backyard".to_string(),
            kind_tag: "davis".to_string(),
            ..Default::default()
        };
        assert_eq!(upload_allowed(Some(&davis)), UploadGate::Allowed);

        // A capability override can grant Weather to any type.
        let hybrid = DeviceConfig {
            capability_override: Some(CapabilitySet::WEATHER | CapabilitySet::SNOW),
            ..snow
        };
        assert_eq!(upload_allowed(Some(&hybrid)), UploadGate::Allowed);
    }

    #[test]
    fn local_midnight_is_today_and_at_or_before_now() {
        let midnight = local_midnight();
        let now = Utc::now();
        assert!(midnight <= now);
        assert!(now - midnight <= chrono::Duration::hours(26));
    }
}
