//! Weather Underground PWS upload controller. One ticker per enabled
//! device with Wunderground credentials; each tick reads the station's
//! latest stored reading and submits it with the `updateraw` protocol.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::model::Reading;
use crate::store::{ControllerKind, DeviceConfig};

use super::{
    join_tickers, rainfall_since_midnight, spawn_device_ticker, upload_allowed, Controller,
    ControllerCtx, UploadGate,
};

pub const DEFAULT_UPLOAD_URL: &str =
    "https://weatherstation.wunderground.com/weatherstation/updateweatherstation.php";

const DEFAULT_UPLOAD_INTERVAL: Duration = Duration::from_secs(300);

/// Builds the `updateraw` query URL for one reading.
pub fn build_upload_url(
    base: &str,
    device: &DeviceConfig,
    reading: &Reading,
    day_rain: f64,
) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("bad upload url {base:?}"))?;
    url.query_pairs_mut()
        .append_pair("action", "updateraw")
        .append_pair("ID", &device.wunderground.station_id)
        .append_pair("PASSWORD", &device.wunderground.password)
        .append_pair("dateutc", "now")
        .append_pair("tempf", &format!("{:.1}", reading.out_temp))
        .append_pair("humidity", &format!("{:.0}", reading.out_humidity))
        .append_pair("baromin", &format!("{:.3}", reading.barometer))
        .append_pair("windspeedmph", &format!("{:.1}", reading.wind_speed))
        .append_pair("winddir", &format!("{:.0}", reading.wind_dir))
        .append_pair("rainin", &format!("{:.2}", reading.rain_rate))
        .append_pair("dailyrainin", &format!("{day_rain:.2}"))
        .append_pair("uv", &format!("{:.1}", reading.uv))
        .append_pair("solarradiation", &format!("{:.1}", reading.solar_watts))
        .append_pair("softwaretype", "weather-core");
    Ok(url)
}

pub struct WundergroundController {
    ctx: ControllerCtx,
    cancel: CancellationToken,
    tickers: Vec<JoinHandle<()>>,
}

impl WundergroundController {
    pub fn new(ctx: ControllerCtx, cancel: CancellationToken) -> WundergroundController {
        WundergroundController {
            ctx,
            cancel,
            tickers: Vec::new(),
        }
    }

    async fn upload_tick(ctx: &ControllerCtx, station: &str) {
        let device = ctx.lookup_device(station).await;
        match upload_allowed(device.as_ref()) {
            UploadGate::Allowed => {}
            UploadGate::StationGone => return,
            UploadGate::NotWeatherCapable => {
                tracing::debug!(station, "skipping upload for non-weather station");
                return;
            }
        }
        let device = device.expect("gate passed");

        let reader = { ctx.reader.read().await.clone() };
        let Some(reader) = reader else {
            tracing::debug!(station, "no time-series store, skipping upload");
            return;
        };
        let reading = match reader.get_latest(station).await {
            Ok(Some(reading)) => reading,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(station, error = %err, "latest lookup failed");
                return;
            }
        };
        let day_rain = match rainfall_since_midnight(&reader, &device).await {
            Ok(total) => total,
            Err(err) => {
                tracing::warn!(station, error = %err, "daily rain recompute failed");
                return;
            }
        };

        let base = device
            .wunderground
            .upload_url
            .as_deref()
            .unwrap_or(DEFAULT_UPLOAD_URL);
        let url = match build_upload_url(base, &device, &reading, day_rain) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(station, error = %err, "bad upload url");
                return;
            }
        };
        match ctx.http.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(station, "wunderground upload ok");
            }
            Ok(response) => {
                tracing::warn!(station, status = %response.status(), "wunderground upload rejected");
            }
            Err(err) => {
                tracing::warn!(station, error = %err, "wunderground upload failed");
            }
        }
    }
}

#[async_trait]
impl Controller for WundergroundController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Wunderground
    }

    async fn start(&mut self) -> Result<()> {
        let devices = self.ctx.provider.get_devices().await?;
        for device in devices {
            if !device.enabled
                || !device.wunderground.enabled
                || device.wunderground.station_id.is_empty()
                || device.wunderground.password.is_empty()
            {
                continue;
            }
            let interval = device
                .wunderground
                .upload_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_UPLOAD_INTERVAL);
            let ctx = self.ctx.clone();
            self.tickers.push(spawn_device_ticker(
                ControllerKind::Wunderground,
                device.name.clone(),
                interval,
                self.cancel.child_token(),
                move |station| {
                    let ctx = ctx.clone();
                    async move {
                        Self::upload_tick(&ctx, &station).await;
                    }
                },
            ));
            tracing::info!(station = %device.name, ?interval, "wunderground uploads scheduled");
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        join_tickers(ControllerKind::Wunderground, &mut self.tickers).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WundergroundService;

    #[test]
    fn upload_url_carries_credentials_and_fields() {
        let device = DeviceConfig {
            name: "backyard".to_string(),
            kind_tag: "davis".to_string(),
            wunderground: WundergroundService {
                enabled: true,
                station_id: "KCODENVE1".to_string(),
                password: "hunter2".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut reading = Reading::new("backyard", "davis");
        reading.out_temp = 72.0;
        reading.wind_dir = 270.0;
        reading.barometer = 29.912;

        let url = build_upload_url(DEFAULT_UPLOAD_URL, &device, &reading, 0.25).unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("ID=KCODENVE1"));
        assert!(query.contains("PASSWORD=hunter2"));
        assert!(query.contains("tempf=72.0"));
        assert!(query.contains("winddir=270"));
        assert!(query.contains("baromin=29.912"));
        assert!(query.contains("dailyrainin=0.25"));
        assert!(query.contains("action=updateraw"));
    }
}
