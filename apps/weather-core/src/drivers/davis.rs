//! Davis console driver (Vantage Pro2 / Vue). Speaks the LOOP protocol
//! over TCP (WeatherLinkIP, port 22222) or a local serial port, decodes the
//! 99-byte fixed-layout packets, and emits canonical readings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;

use crate::model::{CapabilitySet, Reading};
use crate::store::DeviceConfig;
use crate::units::{heat_index_f, wind_chill_f};

use super::{backoff_or_cancel, correct_wind_dir, stop_loop, DriverOutlet};

/// LOOP packets are a fixed 99 bytes: "LOO", 92 data bytes, "\n\r", CRC16.
pub const LOOP_PACKET_LEN: usize = 99;

/// Packets requested per LOOP command.
const LOOP_BATCH: usize = 20;

const WAKE_ATTEMPTS: usize = 3;
const WAKE_TIMEOUT: Duration = Duration::from_millis(500);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LoopError {
    #[error("short packet: {0} bytes")]
    ShortPacket(usize),
    #[error("bad preamble")]
    BadPreamble,
    #[error("missing LF/CR trailer")]
    BadTrailer,
    #[error("CRC mismatch")]
    CrcMismatch,
}

/// CRC16-CCITT as the Davis consoles compute it (poly 0x1021, init 0).
/// A packet with its trailing CRC included sums to zero.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Single unsigned byte, 0xFF meaning "no sensor".
fn byte_or_zero(value: u8) -> f64 {
    if value == 0xFF {
        0.0
    } else {
        f64::from(value)
    }
}

/// Signed 16-bit word, 0x7FFF meaning "no sensor".
fn word_or_zero(buf: &[u8], offset: usize) -> f64 {
    let raw = u16_le(buf, offset);
    if raw == 0x7FFF {
        0.0
    } else {
        f64::from(raw as i16)
    }
}

/// Extra temperature byte: stored with a +90 offset, 0xFF when absent.
fn offset_temp(value: u8) -> f64 {
    if value == 0xFF {
        0.0
    } else {
        f64::from(value) - 90.0
    }
}

/// Storm start date packed as MMMMDDDDDYYYYYYY (year offset 2000).
/// 0xFFFF means no storm in progress.
pub fn unpack_storm_date(raw: u16) -> Option<NaiveDate> {
    if raw == 0xFFFF {
        return None;
    }
    let month = u32::from(raw >> 12);
    let day = u32::from((raw >> 7) & 0x1F);
    let year = i32::from(raw & 0x7F) + 2000;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Console times pack as hour*100 + minute. 0xFFFF means unset.
pub fn unpack_console_time(raw: u16) -> Option<NaiveTime> {
    if raw == 0xFFFF {
        return None;
    }
    let hour = u32::from(raw / 100);
    let minute = u32::from(raw % 100);
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn local_today_at(time: NaiveTime) -> Option<DateTime<Utc>> {
    let date = Local::now().date_naive();
    Local
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn local_midnight_of(date: NaiveDate) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Decoded LOOP packet, still station-agnostic. Flavor A carries the ASCII
/// 'P' where flavor B carries a signed three-hour barometer trend.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopPacket {
    pub bar_trend: Option<i8>,
    pub barometer: f64,
    pub in_temp: f64,
    pub in_humidity: f64,
    pub out_temp: f64,
    pub out_humidity: f64,
    pub wind_speed: f64,
    pub wind_speed10: f64,
    pub wind_dir: f64,
    pub extra_temps: [f64; 7],
    pub soil_temps: [f64; 4],
    pub leaf_temps: [f64; 4],
    pub extra_humidities: [f64; 7],
    pub rain_rate: f64,
    pub uv: f64,
    pub radiation: f64,
    pub storm_rain: f64,
    pub storm_start: Option<NaiveDate>,
    pub day_rain: f64,
    pub month_rain: f64,
    pub year_rain: f64,
    pub soil_moistures: [f64; 4],
    pub leaf_wetnesses: [f64; 4],
    pub inside_alarm: u8,
    pub rain_alarm: u8,
    pub outside_alarm1: u8,
    pub outside_alarm2: u8,
    pub extra_alarms: [u8; 8],
    pub soil_leaf_alarms: [u8; 4],
    pub tx_battery_status: u8,
    pub cons_battery_voltage: f64,
    pub forecast_icon: u8,
    pub forecast_rule: u8,
    pub sunrise: Option<NaiveTime>,
    pub sunset: Option<NaiveTime>,
}

/// Validates and decodes one 99-byte LOOP packet. The CRC runs over the
/// whole packet including the trailing CRC bytes and must come out zero.
pub fn parse_loop_packet(buf: &[u8]) -> Result<LoopPacket, LoopError> {
    if buf.len() < LOOP_PACKET_LEN {
        return Err(LoopError::ShortPacket(buf.len()));
    }
    let buf = &buf[..LOOP_PACKET_LEN];
    if &buf[0..3] != b"LOO" {
        return Err(LoopError::BadPreamble);
    }
    if buf[95] != 0x0A || buf[96] != 0x0D {
        return Err(LoopError::BadTrailer);
    }
    if crc16(buf) != 0 {
        return Err(LoopError::CrcMismatch);
    }

    // Byte 3 is 'P' on revision A firmware, a signed trend on revision B.
    let bar_trend = if buf[3] == b'P' {
        None
    } else {
        Some(buf[3] as i8)
    };

    let mut extra_temps = [0.0; 7];
    for (i, slot) in extra_temps.iter_mut().enumerate() {
        *slot = offset_temp(buf[18 + i]);
    }
    let mut soil_temps = [0.0; 4];
    for (i, slot) in soil_temps.iter_mut().enumerate() {
        *slot = offset_temp(buf[25 + i]);
    }
    let mut leaf_temps = [0.0; 4];
    for (i, slot) in leaf_temps.iter_mut().enumerate() {
        *slot = offset_temp(buf[29 + i]);
    }
    let mut extra_humidities = [0.0; 7];
    for (i, slot) in extra_humidities.iter_mut().enumerate() {
        *slot = byte_or_zero(buf[34 + i]);
    }
    let mut soil_moistures = [0.0; 4];
    for (i, slot) in soil_moistures.iter_mut().enumerate() {
        *slot = byte_or_zero(buf[62 + i]);
    }
    let mut leaf_wetnesses = [0.0; 4];
    for (i, slot) in leaf_wetnesses.iter_mut().enumerate() {
        *slot = byte_or_zero(buf[66 + i]);
    }
    let mut extra_alarms = [0u8; 8];
    extra_alarms.copy_from_slice(&buf[74..82]);
    let mut soil_leaf_alarms = [0u8; 4];
    soil_leaf_alarms.copy_from_slice(&buf[82..86]);

    Ok(LoopPacket {
        bar_trend,
        barometer: f64::from(u16_le(buf, 7)) / 1000.0,
        in_temp: word_or_zero(buf, 9) / 10.0,
        in_humidity: byte_or_zero(buf[11]),
        out_temp: word_or_zero(buf, 12) / 10.0,
        out_humidity: byte_or_zero(buf[33]),
        wind_speed: byte_or_zero(buf[14]),
        wind_speed10: byte_or_zero(buf[15]),
        wind_dir: word_or_zero(buf, 16),
        extra_temps,
        soil_temps,
        leaf_temps,
        extra_humidities,
        rain_rate: f64::from(u16_le(buf, 41)) / 100.0,
        uv: byte_or_zero(buf[43]) / 10.0,
        radiation: word_or_zero(buf, 44),
        storm_rain: f64::from(u16_le(buf, 46)) / 100.0,
        storm_start: unpack_storm_date(u16_le(buf, 48)),
        day_rain: f64::from(u16_le(buf, 50)) / 100.0,
        month_rain: f64::from(u16_le(buf, 52)) / 100.0,
        year_rain: f64::from(u16_le(buf, 54)) / 100.0,
        soil_moistures,
        leaf_wetnesses,
        inside_alarm: buf[70],
        rain_alarm: buf[71],
        outside_alarm1: buf[72],
        outside_alarm2: buf[73],
        extra_alarms,
        soil_leaf_alarms,
        tx_battery_status: buf[86],
        cons_battery_voltage: f64::from(u16_le(buf, 87)) * 300.0 / 512.0 / 100.0,
        forecast_icon: buf[89],
        forecast_rule: buf[90],
        sunrise: unpack_console_time(u16_le(buf, 91)),
        sunset: unpack_console_time(u16_le(buf, 93)),
    })
}

impl LoopPacket {
    pub fn into_reading(self, device: &DeviceConfig) -> Reading {
        let mut reading = Reading::new(&device.name, &device.kind_tag);
        reading.barometer = self.barometer;
        reading.in_temp = self.in_temp;
        reading.in_humidity = self.in_humidity;
        reading.out_temp = self.out_temp;
        reading.out_humidity = self.out_humidity;
        reading.wind_speed = self.wind_speed;
        reading.wind_speed10 = self.wind_speed10;
        reading.wind_dir = correct_wind_dir(self.wind_dir, device.wind_dir_correction);
        reading.wind_chill = wind_chill_f(self.out_temp, self.wind_speed);
        reading.heat_index = heat_index_f(self.out_temp, self.out_humidity);
        [
            reading.extra_temp1,
            reading.extra_temp2,
            reading.extra_temp3,
            reading.extra_temp4,
            reading.extra_temp5,
            reading.extra_temp6,
            reading.extra_temp7,
        ] = self.extra_temps;
        [
            reading.soil_temp1,
            reading.soil_temp2,
            reading.soil_temp3,
            reading.soil_temp4,
        ] = self.soil_temps;
        [
            reading.leaf_temp1,
            reading.leaf_temp2,
            reading.leaf_temp3,
            reading.leaf_temp4,
        ] = self.leaf_temps;
        [
            reading.extra_humidity1,
            reading.extra_humidity2,
            reading.extra_humidity3,
            reading.extra_humidity4,
            reading.extra_humidity5,
            reading.extra_humidity6,
            reading.extra_humidity7,
        ] = self.extra_humidities;
        [
            reading.soil_moisture1,
            reading.soil_moisture2,
            reading.soil_moisture3,
            reading.soil_moisture4,
        ] = self.soil_moistures;
        [
            reading.leaf_wetness1,
            reading.leaf_wetness2,
            reading.leaf_wetness3,
            reading.leaf_wetness4,
        ] = self.leaf_wetnesses;
        reading.rain_rate = self.rain_rate;
        reading.storm_rain = self.storm_rain;
        reading.storm_start = self.storm_start.and_then(local_midnight_of);
        reading.day_rain = self.day_rain;
        reading.month_rain = self.month_rain;
        reading.year_rain = self.year_rain;
        reading.uv = self.uv;
        reading.radiation = self.radiation;
        reading.solar_watts = self.radiation;
        reading.potential_solar_watts = crate::solar::potential_solar_watts(
            device.latitude,
            device.longitude,
            device.altitude,
            reading.time,
        );
        reading.inside_alarm = self.inside_alarm;
        reading.rain_alarm = self.rain_alarm;
        reading.outside_alarm1 = self.outside_alarm1;
        reading.outside_alarm2 = self.outside_alarm2;
        [
            reading.extra_alarm1,
            reading.extra_alarm2,
            reading.extra_alarm3,
            reading.extra_alarm4,
            reading.extra_alarm5,
            reading.extra_alarm6,
            reading.extra_alarm7,
            reading.extra_alarm8,
        ] = self.extra_alarms;
        [
            reading.soil_leaf_alarm1,
            reading.soil_leaf_alarm2,
            reading.soil_leaf_alarm3,
            reading.soil_leaf_alarm4,
        ] = self.soil_leaf_alarms;
        reading.tx_battery_status = self.tx_battery_status;
        reading.cons_battery_voltage = self.cons_battery_voltage;
        reading.forecast_icon = self.forecast_icon;
        reading.forecast_rule = self.forecast_rule;
        reading.sunrise = self.sunrise.and_then(local_today_at);
        reading.sunset = self.sunset.and_then(local_today_at);
        reading
    }
}

trait Conn: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Conn for T {}

pub struct DavisDriver {
    device: DeviceConfig,
    outlet: DriverOutlet,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl DavisDriver {
    pub fn new(
        device: DeviceConfig,
        outlet: DriverOutlet,
        cancel: CancellationToken,
    ) -> Result<DavisDriver> {
        let tcp = device.hostname.is_some() && device.port.is_some();
        let serial = device.serial_device.is_some() && device.baud.is_some();
        anyhow::ensure!(
            tcp || serial,
            "davis device {:?} needs hostname+port or serial+baud",
            device.name
        );
        Ok(DavisDriver {
            device,
            outlet,
            cancel,
            handle: None,
        })
    }
}

#[async_trait]
impl super::StationDriver for DavisDriver {
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
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let conn = match connect(&device).await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(station = %device.name, error = %err, "connect failed, retrying");
                if !backoff_or_cancel(&cancel).await {
                    break;
                }
                continue;
            }
        };
        if let Err(err) = session(conn, &device, &outlet, &cancel).await {
            if cancel.is_cancelled() {
                break;
            }
            tracing::warn!(station = %device.name, error = %err, "console session ended, reconnecting");
        }
        if !backoff_or_cancel(&cancel).await {
            break;
        }
    }
    tracing::debug!(station = %device.name, "davis collection loop exited");
}

async fn connect(device: &DeviceConfig) -> Result<Box<dyn Conn>> {
    if let (Some(hostname), Some(port)) = (&device.hostname, device.port) {
        let stream = TcpStream::connect((hostname.as_str(), port))
            .await
            .with_context(|| format!("connecting to {hostname}:{port}"))?;
        return Ok(Box::new(stream));
    }
    let serial_device = device.serial_device.as_deref().unwrap_or_default();
    let baud = device.baud.unwrap_or(19200);
    let stream = tokio_serial::new(serial_device, baud)
        .open_native_async()
        .with_context(|| format!("opening serial port {serial_device}"))?;
    Ok(Box::new(stream))
}

/// Console wake handshake: send LF, expect LF CR back within 500 ms.
async fn wake(conn: &mut Box<dyn Conn>) -> Result<()> {
    for attempt in 0..WAKE_ATTEMPTS {
        conn.write_all(b"\n").await?;
        let mut echo = [0u8; 2];
        match tokio::time::timeout(WAKE_TIMEOUT, conn.read_exact(&mut echo)).await {
            Ok(Ok(_)) if echo == [0x0A, 0x0D] => return Ok(()),
            Ok(Ok(_)) => {
                tracing::debug!(?echo, attempt, "unexpected wake echo");
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {}
        }
        tokio::time::sleep(WAKE_TIMEOUT).await;
    }
    anyhow::bail!("console did not wake after {WAKE_ATTEMPTS} attempts")
}

async fn session(
    mut conn: Box<dyn Conn>,
    device: &DeviceConfig,
    outlet: &DriverOutlet,
    cancel: &CancellationToken,
) -> Result<()> {
    wake(&mut conn).await?;
    let mut crc_failures = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        conn.write_all(format!("LOOP {LOOP_BATCH}\n").as_bytes())
            .await?;
        // The console leads the batch with an ACK byte.
        let mut ack = [0u8; 1];
        read_with_cancel(&mut conn, &mut ack, cancel).await?;

        // A CRC failure consumes a slot in the batch rather than extending
        // it, so a corruption burst shortens the batch.
        for _ in 0..LOOP_BATCH {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let mut packet = [0u8; LOOP_PACKET_LEN];
            read_with_cancel(&mut conn, &mut packet, cancel).await?;
            match parse_loop_packet(&packet) {
                Ok(parsed) => outlet.emit(parsed.into_reading(device)),
                Err(err) => {
                    crc_failures += 1;
                    tracing::debug!(
                        station = %device.name,
                        error = %err,
                        crc_failures,
                        "discarding bad LOOP packet"
                    );
                    continue;
                }
            }
        }
    }
}

async fn read_with_cancel(
    conn: &mut Box<dyn Conn>,
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("cancelled"),
        read = tokio::time::timeout(READ_TIMEOUT, conn.read_exact(buf)) => {
            read.context("read timed out")??;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a CRC-valid flavor-A LOOP packet with the given raw fields.
    pub(crate) fn synthetic_packet(
        out_temp_raw: i16,
        barometer_raw: u16,
        wind_speed: u8,
        wind_dir: u16,
    ) -> [u8; LOOP_PACKET_LEN] {
        let mut buf = [0xFFu8; LOOP_PACKET_LEN];
        buf[0..3].copy_from_slice(b"LOO");
        buf[3] = b'P';
        buf[4] = 0;
        buf[7..9].copy_from_slice(&barometer_raw.to_le_bytes());
        buf[9..11].copy_from_slice(&700i16.to_le_bytes());
        buf[11] = 40;
        buf[12..14].copy_from_slice(&out_temp_raw.to_le_bytes());
        buf[14] = wind_speed;
        buf[15] = wind_speed;
        buf[16..18].copy_from_slice(&wind_dir.to_le_bytes());
        buf[33] = 55;
        buf[41..43].copy_from_slice(&0u16.to_le_bytes());
        buf[43] = 0xFF;
        buf[44..46].copy_from_slice(&0x7FFFu16.to_le_bytes());
        buf[46..48].copy_from_slice(&0u16.to_le_bytes());
        buf[48..50].copy_from_slice(&0xFFFFu16.to_le_bytes());
        buf[50..52].copy_from_slice(&25u16.to_le_bytes());
        buf[52..54].copy_from_slice(&100u16.to_le_bytes());
        buf[54..56].copy_from_slice(&1200u16.to_le_bytes());
        for b in &mut buf[70..86] {
            *b = 0;
        }
        buf[86] = 0;
        buf[87..89].copy_from_slice(&430u16.to_le_bytes());
        buf[89] = 8;
        buf[90] = 45;
        buf[91..93].copy_from_slice(&712u16.to_le_bytes());
        buf[93..95].copy_from_slice(&1736u16.to_le_bytes());
        buf[95] = 0x0A;
        buf[96] = 0x0D;
        let crc = crc16(&buf[..97]);
        buf[97..99].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    #[test]
    fn crc_of_valid_packet_is_zero() {
        let packet = synthetic_packet(720, 29912, 5, 270);
        assert_eq!(crc16(&packet), 0);
    }

    #[test]
    fn decodes_scaled_fields() {
        let packet = synthetic_packet(720, 29912, 5, 270);
        let parsed = parse_loop_packet(&packet).unwrap();
        assert_eq!(parsed.out_temp, 72.0);
        assert_eq!(parsed.barometer, 29.912);
        assert_eq!(parsed.wind_speed, 5.0);
        assert_eq!(parsed.wind_dir, 270.0);
        assert_eq!(parsed.in_temp, 70.0);
        assert_eq!(parsed.out_humidity, 55.0);
        assert_eq!(parsed.day_rain, 0.25);
        assert_eq!(parsed.year_rain, 12.0);
        assert_eq!(parsed.bar_trend, None);
        // Sentinels decode to zero, not to garbage.
        assert_eq!(parsed.uv, 0.0);
        assert_eq!(parsed.radiation, 0.0);
        assert_eq!(parsed.storm_start, None);
        // Extra temperature slots were 0xFF (absent).
        assert_eq!(parsed.extra_temps, [0.0; 7]);
        assert_eq!(parsed.sunrise, NaiveTime::from_hms_opt(7, 12, 0));
        assert_eq!(parsed.sunset, NaiveTime::from_hms_opt(17, 36, 0));
        assert!((parsed.cons_battery_voltage - 2.51).abs() < 0.01);
    }

    #[test]
    fn every_single_bit_corruption_fails_crc() {
        let packet = synthetic_packet(720, 29912, 5, 270);
        for byte in 0..LOOP_PACKET_LEN {
            for bit in 0..8 {
                let mut corrupted = packet;
                corrupted[byte] ^= 1 << bit;
                assert!(
                    parse_loop_packet(&corrupted).is_err(),
                    "corruption at byte {byte} bit {bit} must not parse"
                );
            }
        }
    }

    #[test]
    fn flavor_b_carries_bar_trend() {
        let mut packet = synthetic_packet(720, 29912, 5, 270);
        packet[3] = (-20i8) as u8;
        let crc = crc16(&packet[..97]);
        packet[97..99].copy_from_slice(&crc.to_be_bytes());
        let parsed = parse_loop_packet(&packet).unwrap();
        assert_eq!(parsed.bar_trend, Some(-20));
    }

    #[test]
    fn rejects_bad_preamble_and_trailer() {
        let mut packet = synthetic_packet(720, 29912, 5, 270);
        packet[0] = b'X';
        assert_eq!(parse_loop_packet(&packet), Err(LoopError::BadPreamble));

        let mut packet = synthetic_packet(720, 29912, 5, 270);
        packet[95] = 0;
        // Trailer check runs before the CRC check.
        assert_eq!(parse_loop_packet(&packet), Err(LoopError::BadTrailer));

        assert_eq!(
            parse_loop_packet(&[0u8; 10]),
            Err(LoopError::ShortPacket(10))
        );
    }

    #[test]
    fn storm_date_unpacks() {
        // 2024-03-15: month 3, day 15, year 24.
        let raw: u16 = (3 << 12) | (15 << 7) | 24;
        assert_eq!(
            unpack_storm_date(raw),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(unpack_storm_date(0xFFFF), None);
    }

    #[test]
    fn wind_dir_correction_applies_to_reading() {
        let packet = synthetic_packet(720, 29912, 5, 350);
        let parsed = parse_loop_packet(&packet).unwrap();
        let device = DeviceConfig {
            name: "backyard".to_string(),
            kind_tag: "davis".to_string(),
            wind_dir_correction: 20.0,
            ..Default::default()
        };
        let reading = parsed.into_reading(&device);
        assert_eq!(reading.wind_dir, 10.0);
        assert_eq!(reading.station_name, "backyard");
        assert_eq!(reading.station_type, "davis");
    }
}
