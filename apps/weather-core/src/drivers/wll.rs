//! WeatherLink Live driver. Two collection modes against the same local
//! API: polling `/v1/current_conditions`, or asking the unit to stream UDP
//! broadcasts via `/v1/real_time` and re-arming the subscription at 90% of
//! its duration. A sensor mapping string binds discovered sensor slots to
//! reading fields; temperatures convert °F→°C and pressure inHg→hPa.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::{CapabilitySet, Reading};
use crate::store::DeviceConfig;
use crate::units::{fahrenheit_to_celsius, in_hg_to_hpa};

use super::{backoff_or_cancel, correct_wind_dir, stop_loop, DriverOutlet};

/// Poll cadence never drops below this; the unit rate-limits its local API.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(30);

const BROADCAST_DURATION_SECS: u64 = 3600;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Rain collector resolution in inches per tip count.
const RAIN_COUNT_INCHES: f64 = 0.01;

/// One entry of the sensor mapping string `type[:txid[:port|option]],…`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorBinding {
    pub kind: String,
    pub txid: Option<u32>,
    pub port: Option<u32>,
}

/// Parses a mapping string such as
/// `th:1,wind:1,rain:1,solar:1,uv:1,baro,th_indoor,soil_temp:1:1,battery:1`.
/// Empty segments are skipped; malformed numbers invalidate the segment.
pub fn parse_sensor_mapping(mapping: &str) -> Vec<SensorBinding> {
    let mut bindings = Vec::new();
    for segment in mapping.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let mut parts = segment.split(':');
        let kind = match parts.next() {
            Some(kind) if !kind.is_empty() => kind.to_string(),
            _ => continue,
        };
        let txid = match parts.next() {
            None => None,
            Some(raw) => match raw.parse::<u32>() {
                Ok(txid) => Some(txid),
                Err(_) => {
                    tracing::warn!(segment, "bad txid in sensor mapping");
                    continue;
                }
            },
        };
        let port = match parts.next() {
            None => None,
            Some(raw) => match raw.parse::<u32>() {
                Ok(port) => Some(port),
                Err(_) => {
                    tracing::warn!(segment, "bad port in sensor mapping");
                    continue;
                }
            },
        };
        bindings.push(SensorBinding { kind, txid, port });
    }
    bindings
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentConditions {
    pub data: ConditionsEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionsEnvelope {
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<ConditionRecord>,
}

/// One sensor slot in a conditions payload. Structure type 1 is an ISS
/// transmitter, 2 is a leaf/soil station, 3 the barometer, 4 the console
/// temp/hum sensor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConditionRecord {
    pub data_structure_type: i64,
    #[serde(default)]
    pub txid: Option<u32>,

    #[serde(default)]
    pub temp: Option<f64>,
    #[serde(default)]
    pub hum: Option<f64>,
    #[serde(default)]
    pub wind_speed_last: Option<f64>,
    #[serde(default)]
    pub wind_dir_last: Option<f64>,
    #[serde(default)]
    pub wind_speed_avg_last_10_min: Option<f64>,
    #[serde(default)]
    pub wind_dir_scalar_avg_last_10_min: Option<f64>,
    #[serde(default)]
    pub rain_rate_last: Option<f64>,
    #[serde(default)]
    pub rainfall_daily: Option<f64>,
    #[serde(default)]
    pub rainfall_monthly: Option<f64>,
    #[serde(default)]
    pub rainfall_year: Option<f64>,
    #[serde(default)]
    pub rain_storm: Option<f64>,
    #[serde(default)]
    pub uv_index: Option<f64>,
    #[serde(default)]
    pub solar_rad: Option<f64>,
    #[serde(default)]
    pub wind_chill: Option<f64>,
    #[serde(default)]
    pub heat_index: Option<f64>,
    #[serde(default)]
    pub trans_battery_flag: Option<u8>,

    #[serde(default)]
    pub temp_1: Option<f64>,
    #[serde(default)]
    pub temp_2: Option<f64>,
    #[serde(default)]
    pub temp_3: Option<f64>,
    #[serde(default)]
    pub temp_4: Option<f64>,
    #[serde(default)]
    pub moist_soil_1: Option<f64>,
    #[serde(default)]
    pub moist_soil_2: Option<f64>,
    #[serde(default)]
    pub moist_soil_3: Option<f64>,
    #[serde(default)]
    pub moist_soil_4: Option<f64>,
    #[serde(default)]
    pub wet_leaf_1: Option<f64>,
    #[serde(default)]
    pub wet_leaf_2: Option<f64>,

    #[serde(default)]
    pub bar_sea_level: Option<f64>,

    #[serde(default)]
    pub temp_in: Option<f64>,
    #[serde(default)]
    pub hum_in: Option<f64>,
}

impl ConditionRecord {
    fn matches_txid(&self, txid: Option<u32>) -> bool {
        match txid {
            None => true,
            Some(wanted) => self.txid == Some(wanted),
        }
    }

    fn soil_temp(&self, port: u32) -> Option<f64> {
        match port {
            1 => self.temp_1,
            2 => self.temp_2,
            3 => self.temp_3,
            4 => self.temp_4,
            _ => None,
        }
    }

    fn soil_moist(&self, port: u32) -> Option<f64> {
        match port {
            1 => self.moist_soil_1,
            2 => self.moist_soil_2,
            3 => self.moist_soil_3,
            4 => self.moist_soil_4,
            _ => None,
        }
    }

    fn leaf_wet(&self, port: u32) -> Option<f64> {
        match port {
            1 => self.wet_leaf_1,
            2 => self.wet_leaf_2,
            _ => None,
        }
    }
}

fn set_th_slot(reading: &mut Reading, slot: usize, temp_c: Option<f64>, hum: Option<f64>) {
    let temp = temp_c.unwrap_or(0.0);
    let hum = hum.unwrap_or(0.0);
    match slot {
        0 => {
            reading.out_temp = temp;
            reading.out_humidity = hum;
        }
        1 => {
            reading.extra_temp1 = temp;
            reading.extra_humidity1 = hum;
        }
        2 => {
            reading.extra_temp2 = temp;
            reading.extra_humidity2 = hum;
        }
        3 => {
            reading.extra_temp3 = temp;
            reading.extra_humidity3 = hum;
        }
        4 => {
            reading.extra_temp4 = temp;
            reading.extra_humidity4 = hum;
        }
        5 => {
            reading.extra_temp5 = temp;
            reading.extra_humidity5 = hum;
        }
        6 => {
            reading.extra_temp6 = temp;
            reading.extra_humidity6 = hum;
        }
        7 => {
            reading.extra_temp7 = temp;
            reading.extra_humidity7 = hum;
        }
        _ => {}
    }
}

fn set_soil_temp_slot(reading: &mut Reading, slot: usize, value: f64) {
    match slot {
        0 => reading.soil_temp1 = value,
        1 => reading.soil_temp2 = value,
        2 => reading.soil_temp3 = value,
        3 => reading.soil_temp4 = value,
        _ => {}
    }
}

fn set_soil_moist_slot(reading: &mut Reading, slot: usize, value: f64) {
    match slot {
        0 => reading.soil_moisture1 = value,
        1 => reading.soil_moisture2 = value,
        2 => reading.soil_moisture3 = value,
        3 => reading.soil_moisture4 = value,
        _ => {}
    }
}

fn set_leaf_wet_slot(reading: &mut Reading, slot: usize, value: f64) {
    match slot {
        0 => reading.leaf_wetness1 = value,
        1 => reading.leaf_wetness2 = value,
        _ => {}
    }
}

/// Applies a conditions payload through the sensor mapping. Binding order
/// decides slot assignment: the first `th` lands in OutTemp/OutHumidity,
/// the second in ExtraTemp1/ExtraHumidity1, and so on.
pub fn conditions_to_reading(
    conditions: &[ConditionRecord],
    bindings: &[SensorBinding],
    device: &DeviceConfig,
) -> Reading {
    let mut reading = Reading::new(&device.name, &device.kind_tag);
    let mut th_slot = 0usize;
    let mut soil_temp_slot = 0usize;
    let mut soil_moist_slot = 0usize;
    let mut leaf_wet_slot = 0usize;

    let iss = |txid: Option<u32>| {
        conditions
            .iter()
            .find(|c| c.data_structure_type == 1 && c.matches_txid(txid))
    };
    let leaf_soil = |txid: Option<u32>| {
        conditions
            .iter()
            .find(|c| c.data_structure_type == 2 && c.matches_txid(txid))
    };

    for binding in bindings {
        match binding.kind.as_str() {
            "th" => {
                let record = iss(binding.txid);
                set_th_slot(
                    &mut reading,
                    th_slot,
                    record.and_then(|r| r.temp).map(fahrenheit_to_celsius),
                    record.and_then(|r| r.hum),
                );
                th_slot += 1;
            }
            "wind" => {
                if let Some(record) = iss(binding.txid) {
                    reading.wind_speed = record.wind_speed_last.unwrap_or(0.0);
                    reading.wind_speed10 = record.wind_speed_avg_last_10_min.unwrap_or(0.0);
                    let dir = record
                        .wind_dir_last
                        .or(record.wind_dir_scalar_avg_last_10_min)
                        .unwrap_or(0.0);
                    reading.wind_dir = correct_wind_dir(dir, device.wind_dir_correction);
                }
            }
            "rain" => {
                if let Some(record) = iss(binding.txid) {
                    reading.rain_rate =
                        record.rain_rate_last.unwrap_or(0.0) * RAIN_COUNT_INCHES;
                    reading.day_rain = record.rainfall_daily.unwrap_or(0.0) * RAIN_COUNT_INCHES;
                    reading.month_rain =
                        record.rainfall_monthly.unwrap_or(0.0) * RAIN_COUNT_INCHES;
                    reading.year_rain = record.rainfall_year.unwrap_or(0.0) * RAIN_COUNT_INCHES;
                    reading.storm_rain = record.rain_storm.unwrap_or(0.0) * RAIN_COUNT_INCHES;
                }
            }
            "solar" => {
                if let Some(record) = iss(binding.txid) {
                    reading.radiation = record.solar_rad.unwrap_or(0.0);
                    reading.solar_watts = reading.radiation;
                }
            }
            "uv" => {
                if let Some(record) = iss(binding.txid) {
                    reading.uv = record.uv_index.unwrap_or(0.0);
                }
            }
            "windchill" => {
                if let Some(record) = iss(binding.txid) {
                    reading.wind_chill = record
                        .wind_chill
                        .map(fahrenheit_to_celsius)
                        .unwrap_or(0.0);
                }
            }
            "thw" | "thsw" => {
                if let Some(record) = iss(binding.txid) {
                    reading.heat_index = record
                        .heat_index
                        .map(fahrenheit_to_celsius)
                        .unwrap_or(0.0);
                }
            }
            "baro" => {
                if let Some(record) = conditions.iter().find(|c| c.data_structure_type == 3) {
                    reading.barometer =
                        record.bar_sea_level.map(in_hg_to_hpa).unwrap_or(0.0);
                }
            }
            "th_indoor" => {
                if let Some(record) = conditions.iter().find(|c| c.data_structure_type == 4) {
                    reading.in_temp = record
                        .temp_in
                        .map(fahrenheit_to_celsius)
                        .unwrap_or(0.0);
                    reading.in_humidity = record.hum_in.unwrap_or(0.0);
                }
            }
            "soil_temp" => {
                let port = binding.port.unwrap_or(1);
                if let Some(value) =
                    leaf_soil(binding.txid).and_then(|r| r.soil_temp(port))
                {
                    set_soil_temp_slot(&mut reading, soil_temp_slot, fahrenheit_to_celsius(value));
                }
                soil_temp_slot += 1;
            }
            "soil_moist" => {
                let port = binding.port.unwrap_or(1);
                if let Some(value) =
                    leaf_soil(binding.txid).and_then(|r| r.soil_moist(port))
                {
                    set_soil_moist_slot(&mut reading, soil_moist_slot, value);
                }
                soil_moist_slot += 1;
            }
            "leaf_wet" => {
                let port = binding.port.unwrap_or(1);
                if let Some(value) = leaf_soil(binding.txid).and_then(|r| r.leaf_wet(port)) {
                    set_leaf_wet_slot(&mut reading, leaf_wet_slot, value);
                }
                leaf_wet_slot += 1;
            }
            "battery" => {
                if let Some(record) = iss(binding.txid) {
                    reading.tx_battery_status = record.trans_battery_flag.unwrap_or(0);
                }
            }
            other => {
                tracing::debug!(kind = other, "ignoring unknown sensor mapping kind");
            }
        }
    }
    reading.potential_solar_watts = crate::solar::potential_solar_watts(
        device.latitude,
        device.longitude,
        device.altitude,
        reading.time,
    );
    reading
}

#[derive(Debug, Clone, Deserialize)]
struct RealTimeResponse {
    data: RealTimeData,
}

#[derive(Debug, Clone, Deserialize)]
struct RealTimeData {
    broadcast_port: u16,
    #[serde(default)]
    duration: Option<u64>,
}

pub struct WeatherLinkLiveDriver {
    device: DeviceConfig,
    outlet: DriverOutlet,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl WeatherLinkLiveDriver {
    pub fn new(
        device: DeviceConfig,
        outlet: DriverOutlet,
        cancel: CancellationToken,
    ) -> Result<WeatherLinkLiveDriver> {
        anyhow::ensure!(
            device.hostname.is_some(),
            "weatherlink-live device {:?} needs a hostname",
            device.name
        );
        Ok(WeatherLinkLiveDriver {
            device,
            outlet,
            cancel,
            handle: None,
        })
    }
}

#[async_trait]
impl super::StationDriver for WeatherLinkLiveDriver {
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
            if device.wll.broadcast {
                broadcast_loop(device, outlet, cancel).await;
            } else {
                poll_loop(device, outlet, cancel).await;
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        stop_loop(&self.device.name, &self.cancel, &mut self.handle).await;
        Ok(())
    }
}

fn api_base(device: &DeviceConfig) -> String {
    let hostname = device.hostname.as_deref().unwrap_or_default();
    match device.port {
        Some(port) => format!("http://{hostname}:{port}"),
        None => format!("http://{hostname}"),
    }
}

fn poll_interval(device: &DeviceConfig) -> Duration {
    let configured = device
        .wll
        .poll_interval_secs
        .map(Duration::from_secs)
        .unwrap_or(MIN_POLL_INTERVAL);
    configured.max(MIN_POLL_INTERVAL)
}

async fn poll_loop(device: DeviceConfig, outlet: DriverOutlet, cancel: CancellationToken) {
    let client = match reqwest::Client::builder().timeout(HTTP_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(station = %device.name, error = %err, "http client build failed");
            return;
        }
    };
    let bindings = parse_sensor_mapping(&device.wll.sensor_mapping);
    let url = format!("{}/v1/current_conditions", api_base(&device));
    let mut ticker = tokio::time::interval(poll_interval(&device));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let conditions = async {
            let response = client.get(&url).send().await?.error_for_status()?;
            response.json::<CurrentConditions>().await
        }
        .await;
        match conditions {
            Ok(payload) => outlet.emit(conditions_to_reading(
                &payload.data.conditions,
                &bindings,
                &device,
            )),
            Err(err) => {
                tracing::warn!(station = %device.name, error = %err, "conditions poll failed")
            }
        }
    }
    tracing::debug!(station = %device.name, "weatherlink poll loop exited");
}

async fn resolve_source_ip(device: &DeviceConfig) -> Result<IpAddr> {
    let hostname = device.hostname.as_deref().unwrap_or_default();
    let mut addrs = tokio::net::lookup_host((hostname, device.port.unwrap_or(80)))
        .await
        .with_context(|| format!("resolving {hostname}"))?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| anyhow::anyhow!("no address for {hostname}"))
}

async fn broadcast_loop(device: DeviceConfig, outlet: DriverOutlet, cancel: CancellationToken) {
    let client = match reqwest::Client::builder().timeout(HTTP_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(station = %device.name, error = %err, "http client build failed");
            return;
        }
    };
    let bindings = parse_sensor_mapping(&device.wll.sensor_mapping);
    let arm_url = format!(
        "{}/v1/real_time?duration={BROADCAST_DURATION_SECS}",
        api_base(&device)
    );

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let source_ip = match resolve_source_ip(&device).await {
            Ok(ip) => ip,
            Err(err) => {
                tracing::warn!(station = %device.name, error = %err, "resolve failed, retrying");
                if !backoff_or_cancel(&cancel).await {
                    break;
                }
                continue;
            }
        };
        let armed = async {
            let response = client.get(&arm_url).send().await?.error_for_status()?;
            response.json::<RealTimeResponse>().await
        }
        .await;
        let armed = match armed {
            Ok(armed) => armed,
            Err(err) => {
                tracing::warn!(station = %device.name, error = %err, "real_time arm failed, retrying");
                if !backoff_or_cancel(&cancel).await {
                    break;
                }
                continue;
            }
        };

        let socket = match UdpSocket::bind(("0.0.0.0", armed.data.broadcast_port)).await {
            Ok(socket) => socket,
            Err(err) => {
                tracing::warn!(station = %device.name, error = %err, "udp bind failed, retrying");
                if !backoff_or_cancel(&cancel).await {
                    break;
                }
                continue;
            }
        };
        let duration = armed.data.duration.unwrap_or(BROADCAST_DURATION_SECS);
        let rearm_after = Duration::from_secs(duration * 9 / 10);
        tracing::info!(
            station = %device.name,
            port = armed.data.broadcast_port,
            rearm_secs = rearm_after.as_secs(),
            "weatherlink broadcast stream armed"
        );

        let rearm = tokio::time::sleep(rearm_after);
        tokio::pin!(rearm);
        let mut buf = vec![0u8; 4096];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = &mut rearm => break,
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, source)) => {
                            if source.ip() != source_ip {
                                tracing::debug!(station = %device.name, %source, "ignoring foreign datagram");
                                continue;
                            }
                            match serde_json::from_slice::<ConditionsEnvelope>(&buf[..len]) {
                                Ok(envelope) => outlet.emit(conditions_to_reading(
                                    &envelope.conditions,
                                    &bindings,
                                    &device,
                                )),
                                Err(err) => {
                                    tracing::warn!(station = %device.name, error = %err, "bad broadcast datagram")
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!(station = %device.name, error = %err, "udp receive failed");
                            break;
                        }
                    }
                }
            }
        }
    }
    tracing::debug!(station = %device.name, "weatherlink broadcast loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(mapping: &str) -> DeviceConfig {
        DeviceConfig {
            name: "roof".to_string(),
            kind_tag: "weatherlink-live".to_string(),
            hostname: Some("wll.local".to_string()),
            wll: crate::store::WeatherLinkLiveOptions {
                sensor_mapping: mapping.to_string(),
                broadcast: false,
                poll_interval_secs: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn mapping_string_parses_with_txid_and_port() {
        let bindings =
            parse_sensor_mapping("th:1, th:2,wind:1,baro,th_indoor,soil_temp:1:3,battery:1");
        assert_eq!(bindings.len(), 7);
        assert_eq!(bindings[0].kind, "th");
        assert_eq!(bindings[0].txid, Some(1));
        assert_eq!(bindings[0].port, None);
        assert_eq!(bindings[3].kind, "baro");
        assert_eq!(bindings[3].txid, None);
        assert_eq!(bindings[5].txid, Some(1));
        assert_eq!(bindings[5].port, Some(3));
    }

    #[test]
    fn malformed_segments_are_dropped() {
        let bindings = parse_sensor_mapping("th:x,,wind:1");
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].kind, "wind");
    }

    fn sample_conditions() -> Vec<ConditionRecord> {
        let payload = r#"[
            {"data_structure_type":1,"txid":1,"temp":68.0,"hum":52.0,
             "wind_speed_last":4.0,"wind_dir_last":270.0,
             "wind_speed_avg_last_10_min":3.5,
             "rain_rate_last":0.0,"rainfall_daily":25.0,
             "uv_index":1.5,"solar_rad":321.0,"trans_battery_flag":0},
            {"data_structure_type":1,"txid":2,"temp":41.0,"hum":80.0},
            {"data_structure_type":2,"txid":3,"temp_3":50.0,"moist_soil_1":22.0,"wet_leaf_1":7.0},
            {"data_structure_type":3,"bar_sea_level":29.92},
            {"data_structure_type":4,"temp_in":70.0,"hum_in":35.0}
        ]"#;
        serde_json::from_str(payload).unwrap()
    }

    #[test]
    fn positional_th_bindings_fill_out_then_extra() {
        let conditions = sample_conditions();
        let bindings = parse_sensor_mapping(
            "th:1,th:2,wind:1,rain:1,solar:1,uv:1,baro,th_indoor,soil_temp:3:3,soil_moist:3:1,leaf_wet:3:1,battery:1",
        );
        let reading = conditions_to_reading(&conditions, &bindings, &device(""));

        // 68 °F → 20 °C in the first th slot, 41 °F → 5 °C in the second.
        assert!((reading.out_temp - 20.0).abs() < 1e-9);
        assert_eq!(reading.out_humidity, 52.0);
        assert!((reading.extra_temp1 - 5.0).abs() < 1e-9);
        assert_eq!(reading.extra_humidity1, 80.0);

        assert_eq!(reading.wind_speed, 4.0);
        assert_eq!(reading.wind_speed10, 3.5);
        assert_eq!(reading.wind_dir, 270.0);

        // 25 counts at 0.01 in each.
        assert!((reading.day_rain - 0.25).abs() < 1e-9);
        assert_eq!(reading.radiation, 321.0);
        assert_eq!(reading.uv, 1.5);

        // 29.92 inHg → ~1013 hPa.
        assert!((reading.barometer - 1013.21).abs() < 0.1);
        assert!((reading.in_temp - fahrenheit_to_celsius(70.0)).abs() < 1e-9);
        assert_eq!(reading.in_humidity, 35.0);

        assert!((reading.soil_temp1 - 10.0).abs() < 1e-9);
        assert_eq!(reading.soil_moisture1, 22.0);
        assert_eq!(reading.leaf_wetness1, 7.0);
    }

    #[test]
    fn missing_transmitter_leaves_slot_zeroed() {
        let conditions = sample_conditions();
        let bindings = parse_sensor_mapping("th:9");
        let reading = conditions_to_reading(&conditions, &bindings, &device(""));
        assert_eq!(reading.out_temp, 0.0);
        assert_eq!(reading.out_humidity, 0.0);
    }

    #[test]
    fn poll_interval_has_a_floor() {
        let mut dev = device("");
        dev.wll.poll_interval_secs = Some(5);
        assert_eq!(poll_interval(&dev), MIN_POLL_INTERVAL);
        dev.wll.poll_interval_secs = Some(120);
        assert_eq!(poll_interval(&dev), Duration::from_secs(120));
    }
}
