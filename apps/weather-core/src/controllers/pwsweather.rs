//! PWSWeather upload controller. Same shape as the Wunderground path with
//! PWSWeather's submit endpoint and parameter names.

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

pub const DEFAULT_UPLOAD_URL: &str = "https://pwsupdate.pwsweather.com/api/v1/submitwx";

const DEFAULT_UPLOAD_INTERVAL: Duration = Duration::from_secs(300);

pub fn build_upload_url(
    base: &str,
    device: &DeviceConfig,
    reading: &Reading,
    day_rain: f64,
) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("bad upload url {base:?}"))?;
    url.query_pairs_mut()
        .append_pair("ID", &device.pwsweather.station_id)
        .append_pair("PASSWORD", &device.pwsweather.password)
        .append_pair("dateutc", &reading.time.format("%Y-%m-%d %H:%M:%S").to_string())
        .append_pair("tempf", &format!("{:.1}", reading.out_temp))
        .append_pair("humidity", &format!("{:.0}", reading.out_humidity))
        .append_pair("baromin", &format!("{:.3}", reading.barometer))
        .append_pair("windspeedmph", &format!("{:.1}", reading.wind_speed))
        .append_pair("winddir", &format!("{:.0}", reading.wind_dir))
        .append_pair("rainin", &format!("{:.2}", reading.rain_rate))
        .append_pair("dailyrainin", &format!("{day_rain:.2}"))
        .append_pair("uv", &format!("{:.1}", reading.uv))
        .append_pair("solarradiation", &format!("{:.1}", reading.solar_watts))
        .append_pair("softwaretype", "weather-core")
        .append_pair("action", "updateraw");
    Ok(url)
}

pub struct PwsWeatherController {
    ctx: ControllerCtx,
    cancel: CancellationToken,
    tickers: Vec<JoinHandle<()>>,
}

impl PwsWeatherController {
    pub fn new(ctx: ControllerCtx, cancel: CancellationToken) -> PwsWeatherController {
        PwsWeatherController {
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
            .pwsweather
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
                tracing::debug!(station, "pwsweather upload ok");
            }
            Ok(response) => {
                tracing::warn!(station, status = %response.status(), "pwsweather upload rejected");
            }
            Err(err) => {
                tracing::warn!(station, error = %err, "pwsweather upload failed");
            }
        }
    }
}

#[async_trait]
impl Controller for PwsWeatherController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::PwsWeather
    }

    async fn start(&mut self) -> Result<()> {
        let devices = self.ctx.provider.get_devices().await?;
        for device in devices {
            if !device.enabled
                || !device.pwsweather.enabled
                || device.pwsweather.station_id.is_empty()
                || device.pwsweather.password.is_empty()
            {
                continue;
            }
            let interval = device
                .pwsweather
                .upload_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_UPLOAD_INTERVAL);
            let ctx = self.ctx.clone();
            self.tickers.push(spawn_device_ticker(
                ControllerKind::PwsWeather,
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
            tracing::info!(station = %device.name, ?interval, "pwsweather uploads scheduled");
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        join_tickers(ControllerKind::PwsWeather, &mut self.tickers).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PwsWeatherService;

    #[test]
    fn upload_url_uses_reading_timestamp() {
        let device = DeviceConfig {
            name: "backyard".to_string(),
            kind_tag: "davis".to_string(),
            pwsweather: PwsWeatherService {
                enabled: true,
                station_id: "MYPWS".to_string(),
                password: "secret".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut reading = Reading::new("backyard", "davis");
        reading.out_temp = 65.5;

        let url = build_upload_url(DEFAULT_UPLOAD_URL, &device, &reading, 0.0).unwrap();
        let query = url.query().unwrap().replace('+', " ");
        assert!(query.contains("ID=MYPWS"));
        assert!(query.contains("tempf=65.5"));
        assert!(query.contains("dateutc="));
        assert!(query.contains("action=updateraw"));
    }
}
