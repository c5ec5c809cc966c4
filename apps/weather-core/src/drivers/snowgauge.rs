//! Ultrasonic snow gauge driver. The gauge exposes a small gRPC service;
//! this driver polls its distance readout and emits readings carrying the
//! raw distance. Depth against the base distance is derived downstream.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use crate::model::{CapabilitySet, Reading};
use crate::proto::snow_gauge_v1_client::SnowGaugeV1Client;
use crate::proto::DistanceRequest;
use crate::store::DeviceConfig;

use super::{backoff_or_cancel, stop_loop, DriverOutlet};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct SnowGaugeDriver {
    device: DeviceConfig,
    outlet: DriverOutlet,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SnowGaugeDriver {
    pub fn new(
        device: DeviceConfig,
        outlet: DriverOutlet,
        cancel: CancellationToken,
    ) -> Result<SnowGaugeDriver> {
        anyhow::ensure!(
            device.hostname.is_some() && device.port.is_some(),
            "snowgauge device {:?} needs hostname and port",
            device.name
        );
        Ok(SnowGaugeDriver {
            device,
            outlet,
            cancel,
            handle: None,
        })
    }
}

#[async_trait]
impl super::StationDriver for SnowGaugeDriver {
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

async fn connect(device: &DeviceConfig) -> Result<SnowGaugeV1Client<Channel>> {
    let endpoint = format!(
        "http://{}:{}",
        device.hostname.as_deref().unwrap_or_default(),
        device.port.unwrap_or_default()
    );
    SnowGaugeV1Client::connect(endpoint.clone())
        .await
        .with_context(|| format!("connecting to snow gauge at {endpoint}"))
}

async fn poll_loop(device: DeviceConfig, outlet: DriverOutlet, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let mut client = match connect(&device).await {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(station = %device.name, error = %err, "gauge connect failed, retrying");
                if !backoff_or_cancel(&cancel).await {
                    break;
                }
                continue;
            }
        };

        let mut ticker = tokio::time::interval(DEFAULT_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match client.get_distance(DistanceRequest {}).await {
                Ok(response) => {
                    let mut reading = Reading::new(&device.name, &device.kind_tag);
                    reading.snow_distance = response.into_inner().distance_mm;
                    outlet.emit(reading);
                }
                Err(status) => {
                    tracing::warn!(
                        station = %device.name,
                        error = %status,
                        "gauge readout failed, reconnecting"
                    );
                    break;
                }
            }
        }
        if !backoff_or_cancel(&cancel).await {
            break;
        }
    }
    tracing::debug!(station = %device.name, "snow gauge poll loop exited");
}
