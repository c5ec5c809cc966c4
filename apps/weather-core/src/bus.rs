//! Distribution bus: a single bounded fan-in channel fed by every station
//! driver, drained by one distributor task that fans readings out to each
//! registered sink's bounded inbox. A slow or dead sink loses readings on
//! its own inbox only; it can never stall the drivers or its peers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::Reading;

/// Fan-in channel capacity. Full channel means drivers drop, not block.
pub const FAN_IN_CAPACITY: usize = 10;

/// Per-sink inbox capacity.
pub const SINK_INBOX_CAPACITY: usize = 10;

struct SinkSlot {
    tx: mpsc::Sender<Reading>,
    dropped: Arc<AtomicU64>,
}

pub struct ReadingBus {
    tx: mpsc::Sender<Reading>,
    rx: Mutex<Option<mpsc::Receiver<Reading>>>,
    sinks: Arc<RwLock<HashMap<String, SinkSlot>>>,
}

impl ReadingBus {
    pub fn new() -> ReadingBus {
        let (tx, rx) = mpsc::channel(FAN_IN_CAPACITY);
        ReadingBus {
            tx,
            rx: Mutex::new(Some(rx)),
            sinks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Sender handed to every driver. Drivers `try_send` and drop on full.
    pub fn sender(&self) -> mpsc::Sender<Reading> {
        self.tx.clone()
    }

    /// Spawns the distributor. Panics if called twice.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut rx = self
            .rx
            .try_lock()
            .expect("bus receiver lock")
            .take()
            .expect("distributor already started");
        let sinks = self.sinks.clone();
        tokio::spawn(async move {
            loop {
                let reading = tokio::select! {
                    _ = cancel.cancelled() => break,
                    reading = rx.recv() => match reading {
                        Some(reading) => reading,
                        None => break,
                    },
                };
                let map = sinks.read().await;
                for (name, slot) in map.iter() {
                    match slot.tx.try_send(reading.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                            let dropped = slot.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                            if dropped % 100 == 1 {
                                tracing::warn!(sink = %name, dropped, "sink inbox full, dropping reading");
                            }
                        }
                    }
                }
            }
            tracing::debug!("distributor exited");
        })
    }

    /// Registers a sink's inbox under a unique name. The counter accrues one
    /// per reading the distributor could not hand to this sink.
    pub async fn add_sink(&self, name: &str, tx: mpsc::Sender<Reading>) -> Arc<AtomicU64> {
        let dropped = Arc::new(AtomicU64::new(0));
        let mut map = self.sinks.write().await;
        map.insert(
            name.to_string(),
            SinkSlot {
                tx,
                dropped: dropped.clone(),
            },
        );
        dropped
    }

    /// Removes a sink from fan-out and closes its inbox by dropping the
    /// sender. The sink's writer drains and exits on channel close.
    pub async fn remove_sink(&self, name: &str) -> bool {
        self.sinks.write().await.remove(name).is_some()
    }

    pub async fn sink_names(&self) -> Vec<String> {
        self.sinks.read().await.keys().cloned().collect()
    }

    /// Per-sink drop counts, exported through the management health payload.
    pub async fn sink_drops(&self) -> HashMap<String, u64> {
        self.sinks
            .read()
            .await
            .iter()
            .map(|(name, slot)| (name.clone(), slot.dropped.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for ReadingBus {
    fn default() -> Self {
        Self::new()
    }
}
