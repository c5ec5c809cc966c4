//! AirGradient indoor air-quality monitor driver. Polls the device's local
//! HTTP endpoint on a fixed interval; port defaults to 80 when the device
//! row leaves it unset.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::{CapabilitySet, Reading};
use crate::store::DeviceConfig;
use crate::units::celsius_to_fahrenheit;

use super::{stop_loop, DriverOutlet};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Measures endpoint payload as the firmware reports it.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AirGradientMeasures {
    #[serde(default)]
    pub atmp: f64,
    #[serde(default)]
    pub rhum: f64,
    #[serde(default, rename = "rco2")]
    pub co2: f64,
    #[serde(default, rename = "pm02")]
    pub pm2_5: f64,
    #[serde(default, rename = "tvoc_index")]
    pub tvoc: f64,
    #[serde(default, rename = "nox_index")]
    pub nox: f64,
}

/// The air-quality series lands in the generic float slots: CO2, PM2.5,
/// TVOC index, NOx index in order. Temperature arrives in Celsius.
pub fn measures_to_reading(measures: &AirGradientMeasures, device: &DeviceConfig) -> Reading {
    let mut reading = Reading::new(&device.name, &device.kind_tag);
    reading.in_temp = celsius_to_fahrenheit(measures.atmp);
    reading.in_humidity = measures.rhum;
    reading.extra_float1 = measures.co2;
    reading.extra_float2 = measures.pm2_5;
    reading.extra_float3 = measures.tvoc;
    reading.extra_float4 = measures.nox;
    reading
}

pub fn measures_url(device: &DeviceConfig) -> String {
    let hostname = device.hostname.as_deref().unwrap_or_default();
    let port = device.port.unwrap_or(80);
    let path = device.path.as_deref().unwrap_or("/measures/current");
    format!("http://{hostname}:{port}{path}")
}

pub struct AirGradientDriver {
    device: DeviceConfig,
    outlet: DriverOutlet,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AirGradientDriver {
    pub fn new(
        device: DeviceConfig,
        outlet: DriverOutlet,
        cancel: CancellationToken,
    ) -> Result<AirGradientDriver> {
        anyhow::ensure!(
            device.hostname.is_some(),
            "airgradient device {:?} needs a hostname",
            device.name
        );
        Ok(AirGradientDriver {
            device,
            outlet,
            cancel,
            handle: None,
        })
    }
}

#[async_trait]
impl super::StationDriver for AirGradientDriver {
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
            poll_loop(device, outlet, cancel).await;
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        stop_loop(&self.device.name, &self.cancel, &mut self.handle).await;
        Ok(())
    }
}

async fn poll_loop(device: DeviceConfig, outlet: DriverOutlet, cancel: CancellationToken) {
    let client = match reqwest::Client::builder().timeout(HTTP_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(station = %device.name, error = %err, "http client build failed");
            return;
        }
    };
    let url = measures_url(&device);
    let mut ticker = tokio::time::interval(DEFAULT_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match poll_once(&client, &url).await {
            Ok(measures) => outlet.emit(measures_to_reading(&measures, &device)),
            Err(err) => {
                tracing::warn!(station = %device.name, error = %err, "measures poll failed")
            }
        }
    }
    tracing::debug!(station = %device.name, "airgradient poll loop exited");
}

async fn poll_once(client: &reqwest::Client, url: &str) -> Result<AirGradientMeasures> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?
        .error_for_status()?;
    Ok(response.json().await.context("decoding measures payload")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_defaults_port_and_path() {
        let device = DeviceConfig {
            name: "office".to_string(),
            kind_tag: "airgradient".to_string(),
            hostname: Some("airgradient.local".to_string()),
            ..Default::default()
        };
        assert_eq!(
            measures_url(&device),
            "http://airgradient.local:80/measures/current"
        );

        let device = DeviceConfig {
            hostname: Some("10.0.0.9".to_string()),
            port: Some(8080),
            path: Some("/v1/measures".to_string()),
            ..device
        };
        assert_eq!(measures_url(&device), "http://10.0.0.9:8080/v1/measures");
    }

    #[test]
    fn measures_map_into_generic_slots() {
        let payload = r#"{"atmp":21.5,"rhum":38.0,"rco2":640,"pm02":3,"tvoc_index":51,"nox_index":1}"#;
        let measures: AirGradientMeasures = serde_json::from_str(payload).unwrap();
        let device = DeviceConfig {
            name: "office".to_string(),
            kind_tag: "airgradient".to_string(),
            ..Default::default()
        };
        let reading = measures_to_reading(&measures, &device);
        assert!((reading.in_temp - 70.7).abs() < 0.01);
        assert_eq!(reading.extra_float1, 640.0);
        assert_eq!(reading.extra_float2, 3.0);
        assert_eq!(reading.extra_float3, 51.0);
    }
}
