//! Campbell Scientific datalogger driver. The logger pushes one JSON
//! object per line over a persistent TCP connection; each line becomes one
//! canonical reading.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::{CapabilitySet, Reading};
use crate::store::DeviceConfig;
use crate::units::{heat_index_f, wind_chill_f};

use super::{backoff_or_cancel, correct_wind_dir, stop_loop, DriverOutlet};

/// Flat packet layout emitted by the datalogger program.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CampbellPacket {
    #[serde(default)]
    pub batt_volt: f64,
    #[serde(default)]
    pub airtemp_f: f64,
    #[serde(default)]
    pub rh: f64,
    #[serde(default)]
    pub baro: f64,
    #[serde(default)]
    pub winddir: f64,
    #[serde(default)]
    pub ws_mph: f64,
    #[serde(default)]
    pub rain_in: f64,
    #[serde(default)]
    pub solar_wm2: f64,
    #[serde(default)]
    pub uv: f64,
}

pub fn packet_to_reading(packet: &CampbellPacket, device: &DeviceConfig) -> Reading {
    let mut reading = Reading::new(&device.name, &device.kind_tag);
    reading.station_battery_voltage = packet.batt_volt;
    reading.out_temp = packet.airtemp_f;
    reading.out_humidity = packet.rh;
    reading.barometer = packet.baro;
    reading.wind_dir = correct_wind_dir(packet.winddir, device.wind_dir_correction);
    reading.wind_speed = packet.ws_mph;
    reading.wind_chill = wind_chill_f(packet.airtemp_f, packet.ws_mph);
    reading.heat_index = heat_index_f(packet.airtemp_f, packet.rh);
    reading.rain_incremental = packet.rain_in;
    reading.radiation = packet.solar_wm2;
    reading.solar_watts = packet.solar_wm2;
    reading.uv = packet.uv;
    reading.potential_solar_watts = crate::solar::potential_solar_watts(
        device.latitude,
        device.longitude,
        device.altitude,
        reading.time,
    );
    reading
}

pub struct CampbellDriver {
    device: DeviceConfig,
    outlet: DriverOutlet,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CampbellDriver {
    pub fn new(
        device: DeviceConfig,
        outlet: DriverOutlet,
        cancel: CancellationToken,
    ) -> Result<CampbellDriver> {
        anyhow::ensure!(
            device.hostname.is_some() && device.port.is_some(),
            "campbell device {:?} needs hostname and port",
            device.name
        );
        Ok(CampbellDriver {
            device,
            outlet,
            cancel,
            handle: None,
        })
    }
}

#[async_trait]
impl super::StationDriver for CampbellDriver {
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
            collection_loop(device, outlet, cancel).await;
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        stop_loop(&self.device.name, &self.cancel, &mut self.handle).await;
        Ok(())
    }
}

async fn collection_loop(device: DeviceConfig, outlet: DriverOutlet, cancel: CancellationToken) {
    let hostname = device.hostname.clone().unwrap_or_default();
    let port = device.port.unwrap_or_default();
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let stream = match TcpStream::connect((hostname.as_str(), port))
            .await
            .with_context(|| format!("connecting to {hostname}:{port}"))
        {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(station = %device.name, error = %err, "connect failed, retrying");
                if !backoff_or_cancel(&cancel).await {
                    break;
                }
                continue;
            }
        };

        let mut lines = BufReader::new(stream).lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => return,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<CampbellPacket>(&line) {
                        Ok(packet) => outlet.emit(packet_to_reading(&packet, &device)),
                        Err(err) => {
                            tracing::warn!(station = %device.name, error = %err, "bad logger line")
                        }
                    }
                }
                Ok(None) => {
                    tracing::warn!(station = %device.name, "logger closed connection");
                    break;
                }
                Err(err) => {
                    tracing::warn!(station = %device.name, error = %err, "logger read failed");
                    break;
                }
            }
        }
        if !backoff_or_cancel(&cancel).await {
            break;
        }
    }
    tracing::debug!(station = %device.name, "campbell collection loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_line_maps_to_reading() {
        let line = r#"{"batt_volt":13.1,"airtemp_f":71.5,"rh":40.0,"baro":29.91,"winddir":350,"ws_mph":5.0,"rain_in":0.02,"solar_wm2":450,"uv":2.5}"#;
        let packet: CampbellPacket = serde_json::from_str(line).unwrap();
        let device = DeviceConfig {
            name: "pasture".to_string(),
            kind_tag: "campbellscientific".to_string(),
            wind_dir_correction: 20.0,
            ..Default::default()
        };
        let reading = packet_to_reading(&packet, &device);
        assert_eq!(reading.out_temp, 71.5);
        assert_eq!(reading.wind_dir, 10.0);
        assert_eq!(reading.rain_incremental, 0.02);
        assert_eq!(reading.station_battery_voltage, 13.1);
        assert_eq!(reading.station_name, "pasture");
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let packet: CampbellPacket = serde_json::from_str(r#"{"airtemp_f":50.0}"#).unwrap();
        assert_eq!(packet.ws_mph, 0.0);
        assert_eq!(packet.baro, 0.0);
    }
}
