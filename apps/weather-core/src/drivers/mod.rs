//! Station drivers. One driver owns one device's transport, speaks its
//! protocol, and pushes canonical readings into the shared fan-in channel.
//! Transport errors reconnect locally with a flat 5 s backoff; a corrupt
//! packet costs only itself. Nothing a driver does may block the bus: a
//! full channel drops the reading against a per-driver counter.

pub mod airgradient;
pub mod ambient;
pub mod campbell;
pub mod davis;
pub mod snowgauge;
pub mod wll;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::{CapabilitySet, Reading, StationKind};
use crate::store::DeviceConfig;

/// Flat reconnect delay used by every network driver.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long `stop()` waits for a collection loop before abandoning it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait StationDriver: Send + Sync {
    fn station_name(&self) -> &str;
    fn capabilities(&self) -> CapabilitySet;

    /// Spawns the collection loop. The driver owns its transport from here
    /// until `stop()`.
    async fn start(&mut self) -> anyhow::Result<()>;

    /// Idempotent. Returns once the loop has exited (or the stop timeout
    /// elapsed) and the transport is closed.
    async fn stop(&mut self) -> anyhow::Result<()>;
}

/// Everything a collection loop needs: where to send, when to quit, and a
/// drop counter for full-channel conditions.
#[derive(Clone)]
pub struct DriverOutlet {
    station_name: Arc<str>,
    tx: mpsc::Sender<Reading>,
    dropped: Arc<AtomicU64>,
}

impl DriverOutlet {
    pub fn new(station_name: &str, tx: mpsc::Sender<Reading>) -> DriverOutlet {
        DriverOutlet {
            station_name: station_name.into(),
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Non-blocking emit. A full fan-in channel costs this reading only.
    pub fn emit(&self, reading: Reading) {
        match self.tx.try_send(reading) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    tracing::warn!(
                        station = %self.station_name,
                        dropped,
                        "fan-in channel full, dropping reading"
                    );
                }
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Cancels `token` and joins the loop task, abandoning it after
/// [`STOP_TIMEOUT`] with a warning. Safe to call with an already-finished
/// or never-started handle.
pub async fn stop_loop(
    station_name: &str,
    token: &CancellationToken,
    handle: &mut Option<JoinHandle<()>>,
) {
    token.cancel();
    if let Some(handle) = handle.take() {
        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(station = %station_name, error = %err, "collection loop panicked")
            }
            Err(_) => {
                tracing::warn!(
                    station = %station_name,
                    "collection loop did not stop within timeout, abandoning"
                )
            }
        }
    }
}

/// Applies the configured wind-direction offset, normalized to [0, 360).
pub fn correct_wind_dir(raw: f64, correction: f64) -> f64 {
    (raw + correction).rem_euclid(360.0)
}

/// Sleeps for the reconnect delay unless cancelled first. Returns false
/// when the loop should exit instead of retrying.
pub async fn backoff_or_cancel(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(RECONNECT_DELAY) => true,
    }
}

/// Builds the driver for a device row. The gRPC receiver is not built here:
/// inbound streams are projected onto the bus by the registry, not polled.
pub fn build_driver(
    device: &DeviceConfig,
    bus: mpsc::Sender<Reading>,
    cancel: CancellationToken,
) -> anyhow::Result<Box<dyn StationDriver>> {
    let kind = device
        .kind()
        .ok_or_else(|| anyhow::anyhow!("unknown station type {:?}", device.kind_tag))?;
    let outlet = DriverOutlet::new(&device.name, bus);
    let driver: Box<dyn StationDriver> = match kind {
        StationKind::Davis => Box::new(davis::DavisDriver::new(device.clone(), outlet, cancel)?),
        StationKind::Campbell => {
            Box::new(campbell::CampbellDriver::new(device.clone(), outlet, cancel)?)
        }
        StationKind::AmbientCustomized => {
            Box::new(ambient::AmbientDriver::new(device.clone(), outlet, cancel)?)
        }
        StationKind::AirGradient => Box::new(airgradient::AirGradientDriver::new(
            device.clone(),
            outlet,
            cancel,
        )?),
        StationKind::WeatherLinkLive => {
            Box::new(wll::WeatherLinkLiveDriver::new(device.clone(), outlet, cancel)?)
        }
        StationKind::SnowGauge => Box::new(snowgauge::SnowGaugeDriver::new(
            device.clone(),
            outlet,
            cancel,
        )?),
        StationKind::GrpcReceiver => {
            anyhow::bail!("grpcreceiver devices are served by the receiver, not a driver")
        }
    };
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wind_dir_correction_wraps() {
        assert_eq!(correct_wind_dir(350.0, 20.0), 10.0);
        assert_eq!(correct_wind_dir(10.0, -20.0), 350.0);
        assert_eq!(correct_wind_dir(270.0, 0.0), 270.0);
    }

    #[tokio::test]
    async fn outlet_drops_when_channel_full() {
        let (tx, _rx) = mpsc::channel(1);
        let outlet = DriverOutlet::new("backyard", tx);
        outlet.emit(Reading::new("backyard", "davis"));
        outlet.emit(Reading::new("backyard", "davis"));
        outlet.emit(Reading::new("backyard", "davis"));
        assert_eq!(outlet.dropped(), 2);
    }

    #[tokio::test]
    async fn stop_loop_tolerates_missing_handle() {
        let token = CancellationToken::new();
        let mut handle = None;
        stop_loop("backyard", &token, &mut handle).await;
        assert!(token.is_cancelled());
    }
}
