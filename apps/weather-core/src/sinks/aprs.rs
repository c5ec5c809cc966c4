//! APRS-IS uplink. Holds the newest reading per station in memory and, on
//! a fixed cadence, reports every APRS-enabled weather station to the
//! configured APRS-IS rotate host: compressed Base91 position, compressed
//! course/speed wind, then the textual weather extension.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::SINK_INBOX_CAPACITY;
use crate::model::{CapabilitySet, Reading};
use crate::store::{ConfigProvider, DeviceConfig, SinkHealth};
use crate::units::{in_hg_to_millibars, mph_to_knots};

use super::health::spawn_health_ticker;
use super::{join_writer, StorageBackend};

pub const DEFAULT_SERVER: &str = "noam.aprs2.net:14580";

/// Report cadence while the sink is enabled.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const SOFTWARE_NAME: &str = "weather-core";

/// Base91 encodes a value into four printable digits offset by 33,
/// most-significant first. Covers 0..91^4.
pub fn encode_base91(value: u32) -> [u8; 4] {
    let mut digits = [0u8; 4];
    let mut rest = value;
    for slot in digits.iter_mut().rev() {
        *slot = (rest % 91) as u8 + 33;
        rest /= 91;
    }
    digits
}

pub fn decode_base91(digits: [u8; 4]) -> u32 {
    digits
        .iter()
        .fold(0u32, |acc, &d| acc * 91 + u32::from(d - 33))
}

/// APRS compressed-position precompression of latitude/longitude.
pub fn precompress_lat(lat: f64) -> u32 {
    (380926.0 * (90.0 - lat)).round() as u32
}

pub fn precompress_lon(lon: f64) -> u32 {
    (190463.0 * (180.0 + lon)).round() as u32
}

/// Wind direction compresses to a quarter-degree character.
fn compress_course(deg: f64) -> u8 {
    ((deg / 4.0).round() as i32 + 33).clamp(33, 123) as u8
}

/// Wind speed in knots compresses on a 1.08 exponential scale.
fn compress_speed(knots: f64) -> u8 {
    if knots < 1.0 {
        return 33;
    }
    ((knots.ln() / 1.08f64.ln()).round() as i32 + 34).clamp(33, 123) as u8
}

/// One complete position + weather report line, newline terminated by the
/// caller. Symbol `_` is the weather station; table `/` is primary.
pub fn build_weather_packet(callsign: &str, lat: f64, lon: f64, reading: &Reading) -> String {
    let lat_digits = encode_base91(precompress_lat(lat));
    let lon_digits = encode_base91(precompress_lon(lon));
    let course = compress_course(reading.wind_dir);
    let speed = compress_speed(mph_to_knots(reading.wind_speed));

    let temp = reading.out_temp.round() as i64;
    let gust = reading.wind_speed10.round() as i64;
    let day_rain_hundredths = (reading.day_rain * 100.0).round() as i64;
    // APRS encodes 100% humidity as 00.
    let humidity = match reading.out_humidity.round() as i64 {
        h if h >= 100 => 0,
        h => h.max(0),
    };
    let baro_tenths_mb = (in_hg_to_millibars(reading.barometer) * 10.0).round() as i64;

    format!(
        "{callsign}>APRS,TCPIP*:!/{lat}{lon}_{course}{speed}Gg{gust:03}t{temp:03}P{rain:03}h{humidity:02}b{baro:05}{software}",
        callsign = callsign,
        lat = String::from_utf8_lossy(&lat_digits),
        lon = String::from_utf8_lossy(&lon_digits),
        course = course as char,
        speed = speed as char,
        gust = gust.clamp(0, 999),
        temp = temp.clamp(-99, 999),
        rain = day_rain_hundredths.clamp(0, 999),
        humidity = humidity,
        baro = baro_tenths_mb.clamp(0, 99999),
        software = SOFTWARE_NAME,
    )
}

pub fn login_line(callsign: &str, passcode: &str) -> String {
    format!(
        "user {callsign} pass {passcode} vers {SOFTWARE_NAME} {}\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Standard APRS-IS passcode for a callsign (XOR fold over the base call,
/// SSID stripped). Used when a station registers with a callsign only.
pub fn aprs_passcode(callsign: &str) -> u16 {
    let base = callsign
        .split('-')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    let mut hash: u16 = 0x73e2;
    for (i, byte) in base.bytes().enumerate() {
        if i % 2 == 0 {
            hash ^= u16::from(byte) << 8;
        } else {
            hash ^= u16::from(byte);
        }
    }
    hash & 0x7fff
}

pub struct AprsSink {
    name: String,
    server: String,
    provider: Arc<dyn ConfigProvider>,
    last_send_unix: Arc<AtomicI64>,
    cancel: Option<CancellationToken>,
    writer: Option<JoinHandle<()>>,
    health_ticker: Option<JoinHandle<()>>,
}

impl AprsSink {
    pub fn new(
        name: impl Into<String>,
        server: impl Into<String>,
        provider: Arc<dyn ConfigProvider>,
    ) -> AprsSink {
        let server = server.into();
        AprsSink {
            name: name.into(),
            server: if server.is_empty() {
                DEFAULT_SERVER.to_string()
            } else {
                server
            },
            provider,
            last_send_unix: Arc::new(AtomicI64::new(0)),
            cancel: None,
            writer: None,
            health_ticker: None,
        }
    }
}

#[async_trait]
impl StorageBackend for AprsSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(
        &mut self,
        cancel: CancellationToken,
    ) -> anyhow::Result<mpsc::Sender<Reading>> {
        let (tx, rx) = mpsc::channel::<Reading>(SINK_INBOX_CAPACITY);
        let name = self.name.clone();
        let server = self.server.clone();
        let provider = self.provider.clone();
        let last_send = self.last_send_unix.clone();
        let writer_cancel = cancel.clone();
        self.writer = Some(tokio::spawn(async move {
            report_loop(name, server, provider, last_send, rx, writer_cancel).await;
        }));

        let health_last_send = self.last_send_unix.clone();
        self.health_ticker = Some(spawn_health_ticker(
            self.name.clone(),
            self.provider.clone(),
            cancel.clone(),
            move || {
                let last_send = health_last_send.clone();
                async move { send_health(&last_send) }
            },
        ));
        self.cancel = Some(cancel);
        Ok(tx)
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        join_writer(&self.name, &mut self.writer).await;
        if let Some(ticker) = self.health_ticker.take() {
            let _ = ticker.await;
        }
        Ok(())
    }

    async fn health_check(&self) -> SinkHealth {
        send_health(&self.last_send_unix)
    }
}

fn send_health(last_send_unix: &AtomicI64) -> SinkHealth {
    let last_send = last_send_unix.load(Ordering::Relaxed);
    if last_send == 0 {
        return SinkHealth::healthy("no reports sent yet");
    }
    let age = Utc::now().timestamp() - last_send;
    if age > 300 {
        SinkHealth::unhealthy("reports stalled", format!("last send {age}s ago"))
    } else {
        SinkHealth::healthy(format!("last send {age}s ago"))
    }
}

/// Consumes the inbox to keep the freshest reading per station and reports
/// on the cadence. Stations without the Weather capability, without APRS
/// enabled, or without a callsign are never reported.
async fn report_loop(
    name: String,
    server: String,
    provider: Arc<dyn ConfigProvider>,
    last_send_unix: Arc<AtomicI64>,
    mut rx: mpsc::Receiver<Reading>,
    cancel: CancellationToken,
) {
    let mut latest: HashMap<String, Reading> = HashMap::new();
    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            reading = rx.recv() => match reading {
                Some(reading) => {
                    latest.insert(reading.station_name.clone(), reading);
                }
                None => break,
            },
            _ = ticker.tick() => {
                if latest.is_empty() {
                    continue;
                }
                let devices = match provider.get_devices().await {
                    Ok(devices) => devices,
                    Err(err) => {
                        tracing::warn!(sink = %name, error = %err, "device lookup failed");
                        continue;
                    }
                };
                for (device, reading) in eligible_reports(&devices, &latest) {
                    match report_station(&server, device, reading).await {
                        Ok(()) => {
                            last_send_unix.store(Utc::now().timestamp(), Ordering::Relaxed);
                        }
                        Err(err) => {
                            tracing::warn!(
                                sink = %name,
                                station = %device.name,
                                error = %err,
                                "report failed"
                            );
                        }
                    }
                }
            }
        }
    }
    tracing::debug!(sink = %name, "aprs report loop exited");
}

/// Stations eligible for a report this cycle: APRS enabled with a
/// callsign, Weather-capable, and holding a current reading. Snow gauges
/// and air-quality monitors never produce a packet regardless of their
/// APRS flags.
fn eligible_reports<'a>(
    devices: &'a [DeviceConfig],
    latest: &'a HashMap<String, Reading>,
) -> Vec<(&'a DeviceConfig, &'a Reading)> {
    devices
        .iter()
        .filter(|device| device.aprs.enabled && !device.aprs.callsign.is_empty())
        .filter(|device| {
            let weather = device.capabilities().contains(CapabilitySet::WEATHER);
            if !weather {
                tracing::debug!(station = %device.name, "skipping non-weather station");
            }
            weather
        })
        .filter_map(|device| latest.get(&device.name).map(|reading| (device, reading)))
        .collect()
}

/// One report: connect, log in, send the packet, disconnect.
async fn report_station(server: &str, device: &DeviceConfig, reading: &Reading) -> Result<()> {
    let packet = build_weather_packet(
        &device.aprs.callsign,
        device.latitude,
        device.longitude,
        reading,
    );
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(server))
        .await
        .context("connect timed out")?
        .with_context(|| format!("connecting to {server}"))?;

    let passcode = if device.aprs.passcode.is_empty() {
        aprs_passcode(&device.aprs.callsign).to_string()
    } else {
        device.aprs.passcode.clone()
    };
    stream
        .write_all(login_line(&device.aprs.callsign, &passcode).as_bytes())
        .await?;
    // The server greets with a banner and a logresp line; drain what is
    // available without insisting on a particular verdict text.
    let mut banner = [0u8; 512];
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut banner)).await;

    stream.write_all(packet.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base91_is_a_bijection_on_the_domain() {
        // Spot grid across the full 91^4 domain plus edges.
        let max = 91u32.pow(4);
        for value in (0..max).step_by(7_919_993).chain([0, max - 1]) {
            let digits = encode_base91(value);
            assert!(digits.iter().all(|&d| (33..124).contains(&d)));
            assert_eq!(decode_base91(digits), value, "value {value}");
        }
    }

    #[test]
    fn position_precompression_matches_known_values() {
        // The APRS spec worked example: 49.5 N, 72.75 W.
        let lat = precompress_lat(49.5);
        let lon = precompress_lon(-72.75);
        assert_eq!(lat, 15_427_503);
        assert_eq!(lon, 20_427_157);
        assert_eq!(decode_base91(encode_base91(lat)), lat);
    }

    #[test]
    fn packet_carries_wind_temp_rain_humidity_barometer() {
        let mut reading = Reading::new("backyard", "davis");
        reading.out_temp = 72.0;
        reading.out_humidity = 55.0;
        reading.wind_speed = 10.0;
        reading.wind_speed10 = 12.0;
        reading.wind_dir = 180.0;
        reading.day_rain = 0.25;
        reading.barometer = 29.92;

        let packet = build_weather_packet("K0TEST-13", 39.75, -105.0, &reading);
        assert!(packet.starts_with("K0TEST-13>APRS,TCPIP*:!/"));
        assert!(packet.contains("t072"));
        assert!(packet.contains("P025"));
        assert!(packet.contains("h55"));
        // 29.92 inHg → 1013.2 mb → 10132 tenths.
        assert!(packet.contains("b10132"));
        assert!(packet.contains("g012"));
        assert!(packet.ends_with(SOFTWARE_NAME));
    }

    #[test]
    fn hundred_percent_humidity_encodes_as_zero() {
        let mut reading = Reading::new("backyard", "davis");
        reading.out_humidity = 100.0;
        let packet = build_weather_packet("K0TEST", 39.75, -105.0, &reading);
        assert!(packet.contains("h00"));
    }

    #[test]
    fn login_line_format() {
        let line = login_line("K0TEST", "12345");
        assert!(line.starts_with("user K0TEST pass 12345 vers weather-core "));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn passcode_matches_known_value() {
        assert_eq!(aprs_passcode("N0CALL"), 13023);
        assert_eq!(aprs_passcode("n0call-13"), 13023, "case and SSID ignored");
    }

    #[test]
    fn snow_gauge_with_aprs_enabled_never_reports() {
        use crate::store::AprsService;

        let mut latest = HashMap::new();
        latest.insert("gauge".to_string(), Reading::new("gauge", "snowgauge"));
        latest.insert("backyard".to_string(), Reading::new("backyard", "davis"));

        let aprs = AprsService {
            enabled: true,
            callsign: "K0TEST".to_string(),
            passcode: "12345".to_string(),
        };
        let devices = vec![
            DeviceConfig {
                name: "gauge".to_string(),
                kind_tag: "snowgauge".to_string(),
                enabled: true,
                aprs: aprs.clone(),
                ..Default::default()
            },
            DeviceConfig {
                name: "backyard".to_string(),
                kind_tag: "davis".to_string(),
                enabled: true,
                aprs,
                ..Default::default()
            },
            // Weather-capable but APRS off.
            DeviceConfig {
                name: "patio".to_string(),
                kind_tag: "davis".to_string(),
                enabled: true,
                ..Default::default()
            },
        ];

        let reports = eligible_reports(&devices, &latest);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0.name, "backyard");
    }

    #[test]
    fn calm_wind_compresses_to_space_band_floor() {
        assert_eq!(compress_speed(0.0), 33);
        assert!(compress_speed(8.7) > 33);
        assert_eq!(compress_course(0.0), 33);
        assert_eq!(compress_course(360.0), 123);
    }
}
