//! Ambient customized-server driver. The console is pointed at this
//! process ("customized" upload mode) and issues one Wunderground-style
//! querystring request per observation interval; every hit on the
//! configured path becomes one canonical reading.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

use crate::model::{CapabilitySet, Reading};
use crate::store::DeviceConfig;
use crate::units::{heat_index_f, wind_chill_f};

use super::{backoff_or_cancel, correct_wind_dir, stop_loop, DriverOutlet};

/// Decodes the console's querystring payload. Unknown keys are ignored;
/// unparsable numbers drop the key rather than the whole request.
pub fn parse_ambient_query(query: &str, device: &DeviceConfig) -> Reading {
    let mut reading = Reading::new(&device.name, &device.kind_tag);
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let Ok(number) = value.parse::<f64>() else {
            continue;
        };
        match key.as_ref() {
            "tempf" => reading.out_temp = number,
            "humidity" => reading.out_humidity = number,
            "indoortempf" => reading.in_temp = number,
            "indoorhumidity" => reading.in_humidity = number,
            "baromin" => reading.barometer = number,
            "windspeedmph" => reading.wind_speed = number,
            "winddir" => {
                reading.wind_dir = correct_wind_dir(number, device.wind_dir_correction)
            }
            "rainin" => reading.rain_rate = number,
            "dailyrainin" => reading.day_rain = number,
            "monthlyrainin" => reading.month_rain = number,
            "yearlyrainin" => reading.year_rain = number,
            "solarradiation" => {
                reading.radiation = number;
                reading.solar_watts = number;
            }
            "uv" | "UV" => reading.uv = number,
            "soiltempf" => reading.soil_temp1 = number,
            "soilmoisture" => reading.soil_moisture1 = number,
            "battout" => reading.station_battery_voltage = number,
            _ => {}
        }
    }
    reading.wind_chill = wind_chill_f(reading.out_temp, reading.wind_speed);
    reading.heat_index = heat_index_f(reading.out_temp, reading.out_humidity);
    reading.potential_solar_watts = crate::solar::potential_solar_watts(
        device.latitude,
        device.longitude,
        device.altitude,
        reading.time,
    );
    reading
}

#[derive(Clone)]
struct ListenerState {
    device: DeviceConfig,
    outlet: DriverOutlet,
}

async fn ingest_handler(
    State(state): State<ListenerState>,
    RawQuery(query): RawQuery,
) -> (StatusCode, &'static str) {
    let query = query.unwrap_or_default();
    state
        .outlet
        .emit(parse_ambient_query(&query, &state.device));
    (StatusCode::OK, "success")
}

pub struct AmbientDriver {
    device: DeviceConfig,
    outlet: DriverOutlet,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AmbientDriver {
    pub fn new(
        device: DeviceConfig,
        outlet: DriverOutlet,
        cancel: CancellationToken,
    ) -> Result<AmbientDriver> {
        anyhow::ensure!(
            device.port.is_some(),
            "ambient device {:?} needs a listen port",
            device.name
        );
        anyhow::ensure!(
            device.path.as_deref().is_some_and(|p| p.starts_with('/')),
            "ambient device {:?} needs a path starting with /",
            device.name
        );
        Ok(AmbientDriver {
            device,
            outlet,
            cancel,
            handle: None,
        })
    }
}

#[async_trait]
impl super::StationDriver for AmbientDriver {
    fn station_name(&self) -> &str {
        &self.device.name
    }

    fn capabilities(&self) -> CapabilitySet {
        self.device.capabilities()
    }

    async fn start(&mut self) -> Result<()> {
        let device = self.device.clone();
        let outlet = self.outlet.clone();
        let cancel = self.cancel.clone();
        self.handle = Some(tokio::spawn(async move {
            listen_loop(device, outlet, cancel).await;
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        stop_loop(&self.device.name, &self.cancel, &mut self.handle).await;
        Ok(())
    }
}

async fn listen_loop(device: DeviceConfig, outlet: DriverOutlet, cancel: CancellationToken) {
    let port = device.port.unwrap_or_default();
    let path = device.path.clone().unwrap_or_default();
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let state = ListenerState {
            device: device.clone(),
            outlet: outlet.clone(),
        };
        let app = Router::new()
            .route(&path, get(ingest_handler).post(ingest_handler))
            .with_state(state);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding ambient listener on {addr}"))
        {
            Ok(listener) => listener,
            Err(err) => {
                tracing::warn!(station = %device.name, error = %err, "bind failed, retrying");
                if !backoff_or_cancel(&cancel).await {
                    break;
                }
                continue;
            }
        };
        tracing::info!(station = %device.name, %addr, path = %path, "ambient listener up");

        let shutdown = cancel.clone();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(err) = serve.await {
            tracing::warn!(station = %device.name, error = %err, "ambient listener failed");
        }
        if cancel.is_cancelled() {
            break;
        }
        if !backoff_or_cancel(&cancel).await {
            break;
        }
    }
    tracing::debug!(station = %device.name, "ambient listener exited");
}
