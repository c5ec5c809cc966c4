//! gRPC republisher sink. Streams every reading to a remote aggregation
//! core. Stations without a persisted remote UUID register themselves on
//! first use and the assigned UUID is written back into the config store.
//! Stream failures reconnect with bounded exponential backoff (1 s doubling
//! to a 60 s cap).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint, Identity};
use uuid::Uuid;

use crate::bus::SINK_INBOX_CAPACITY;
use crate::model::Reading;
use crate::proto;
use crate::proto::weather_v1_client::WeatherV1Client;
use crate::store::{ConfigProvider, SinkHealth};

use super::health::spawn_health_ticker;
use super::{join_writer, StorageBackend};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct LinkState {
    connected: AtomicBool,
    last_send_unix: AtomicI64,
}

pub struct GrpcSink {
    name: String,
    endpoint: String,
    tls_cert: Option<String>,
    tls_key: Option<String>,
    provider: Arc<dyn ConfigProvider>,
    state: Arc<LinkState>,
    cancel: Option<CancellationToken>,
    writer: Option<JoinHandle<()>>,
    health_ticker: Option<JoinHandle<()>>,
}

impl GrpcSink {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        tls_cert: Option<String>,
        tls_key: Option<String>,
        provider: Arc<dyn ConfigProvider>,
    ) -> GrpcSink {
        GrpcSink {
            name: name.into(),
            endpoint: endpoint.into(),
            tls_cert,
            tls_key,
            provider,
            state: Arc::new(LinkState::default()),
            cancel: None,
            writer: None,
            health_ticker: None,
        }
    }

    async fn build_endpoint(&self) -> Result<Endpoint> {
        let mut endpoint = Endpoint::from_shared(self.endpoint.clone())
            .with_context(|| format!("bad grpc endpoint {:?}", self.endpoint))?
            .timeout(RPC_TIMEOUT)
            .connect_timeout(RPC_TIMEOUT);
        if let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) {
            let cert_pem = tokio::fs::read(cert)
                .await
                .with_context(|| format!("reading tls cert {cert}"))?;
            let key_pem = tokio::fs::read(key)
                .await
                .with_context(|| format!("reading tls key {key}"))?;
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().identity(Identity::from_pem(cert_pem, key_pem)))
                .context("building tls config")?;
        }
        Ok(endpoint)
    }
}

#[async_trait]
impl StorageBackend for GrpcSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(
        &mut self,
        cancel: CancellationToken,
    ) -> anyhow::Result<mpsc::Sender<Reading>> {
        let endpoint = self.build_endpoint().await?;
        let (tx, rx) = mpsc::channel::<Reading>(SINK_INBOX_CAPACITY);

        let name = self.name.clone();
        let provider = self.provider.clone();
        let state = self.state.clone();
        let writer_cancel = cancel.clone();
        self.writer = Some(tokio::spawn(async move {
            uplink_loop(name, endpoint, provider, state, rx, writer_cancel).await;
        }));

        let health_state = self.state.clone();
        self.health_ticker = Some(spawn_health_ticker(
            self.name.clone(),
            self.provider.clone(),
            cancel.clone(),
            move || {
                let state = health_state.clone();
                async move { link_health(&state) }
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
        link_health(&self.state)
    }
}

fn link_health(state: &LinkState) -> SinkHealth {
    if !state.connected.load(Ordering::Relaxed) {
        return SinkHealth::unhealthy("uplink down", "stream not established");
    }
    let last_send = state.last_send_unix.load(Ordering::Relaxed);
    if last_send == 0 {
        return SinkHealth::healthy("stream open, nothing sent yet");
    }
    let age = Utc::now().timestamp() - last_send;
    SinkHealth::healthy(format!("last send {age}s ago"))
}

async fn uplink_loop(
    name: String,
    endpoint: Endpoint,
    provider: Arc<dyn ConfigProvider>,
    state: Arc<LinkState>,
    mut rx: mpsc::Receiver<Reading>,
    cancel: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;
    let mut station_ids: HashMap<String, Uuid> = HashMap::new();

    'reconnect: loop {
        if cancel.is_cancelled() {
            break;
        }
        let channel = tokio::select! {
            _ = cancel.cancelled() => break,
            channel = endpoint.connect() => channel,
        };
        let channel = match channel {
            Ok(channel) => channel,
            Err(err) => {
                tracing::warn!(sink = %name, error = %err, "uplink connect failed");
                state.connected.store(false, Ordering::Relaxed);
                if !sleep_backoff(&mut backoff, &cancel).await {
                    break;
                }
                continue;
            }
        };
        let mut client = WeatherV1Client::new(channel);
        state.connected.store(true, Ordering::Relaxed);
        backoff = INITIAL_BACKOFF;
        tracing::info!(sink = %name, "uplink stream open");

        let (stream_tx, stream_rx) = mpsc::channel::<proto::WeatherReading>(SINK_INBOX_CAPACITY);
        let mut rpc_client = client.clone();
        let mut rpc = tokio::spawn(async move {
            rpc_client
                .send_weather_readings(ReceiverStream::new(stream_rx))
                .await
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    drop(stream_tx);
                    let _ = rpc.await;
                    break 'reconnect;
                }
                result = &mut rpc => {
                    match result {
                        Ok(Ok(_)) => tracing::info!(sink = %name, "uplink stream closed by remote"),
                        Ok(Err(status)) => {
                            tracing::warn!(sink = %name, error = %status, "uplink stream failed")
                        }
                        Err(err) => tracing::warn!(sink = %name, error = %err, "uplink task failed"),
                    }
                    state.connected.store(false, Ordering::Relaxed);
                    if !sleep_backoff(&mut backoff, &cancel).await {
                        break 'reconnect;
                    }
                    continue 'reconnect;
                }
                reading = rx.recv() => {
                    let Some(reading) = reading else {
                        // Inbox closed: the bus deregistered this sink.
                        drop(stream_tx);
                        let _ = rpc.await;
                        break 'reconnect;
                    };
                    let Some(wire) = prepare_wire(
                        &name,
                        &mut client,
                        &provider,
                        &mut station_ids,
                        reading,
                    )
                    .await
                    else {
                        continue;
                    };
                    if stream_tx.send(wire).await.is_err() {
                        // The rpc branch will observe the failure next turn.
                        continue;
                    }
                    state.last_send_unix.store(Utc::now().timestamp(), Ordering::Relaxed);
                }
            }
        }
    }
    state.connected.store(false, Ordering::Relaxed);
    tracing::debug!(sink = %name, "uplink writer exited");
}

async fn sleep_backoff(backoff: &mut Duration, cancel: &CancellationToken) -> bool {
    let delay = *backoff;
    *backoff = (*backoff * 2).min(MAX_BACKOFF);
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Stamps the wire reading with its remote station UUID, registering the
/// station on first use and persisting the assignment. Readings that came
/// in over gRPC already carry their UUID and pass through as-is.
async fn prepare_wire(
    sink: &str,
    client: &mut WeatherV1Client<Channel>,
    provider: &Arc<dyn ConfigProvider>,
    station_ids: &mut HashMap<String, Uuid>,
    reading: Reading,
) -> Option<proto::WeatherReading> {
    let mut wire = reading.to_wire();
    if !wire.station_id.is_empty() {
        return Some(wire);
    }
    if let Some(id) = station_ids.get(&reading.station_name) {
        wire.station_id = id.to_string();
        return Some(wire);
    }

    let devices = match provider.get_devices().await {
        Ok(devices) => devices,
        Err(err) => {
            tracing::warn!(sink = %sink, error = %err, "device lookup failed, dropping reading");
            return None;
        }
    };
    let Some(device) = devices.iter().find(|d| d.name == reading.station_name) else {
        tracing::warn!(
            sink = %sink,
            station = %reading.station_name,
            "reading from unknown station, dropping"
        );
        return None;
    };

    let id = match device.remote_station_id {
        Some(id) => id,
        None => {
            let request = proto::RemoteStationConfig {
                station_id: String::new(),
                station_name: device.name.clone(),
                station_type: device.kind_tag.clone(),
                aprs_enabled: device.aprs.enabled,
                aprs_callsign: device.aprs.callsign.clone(),
                wu_enabled: device.wunderground.enabled,
                wu_station_id: device.wunderground.station_id.clone(),
                wu_password: device.wunderground.password.clone(),
                pws_enabled: device.pwsweather.enabled,
                pws_station_id: device.pwsweather.station_id.clone(),
                pws_password: device.pwsweather.password.clone(),
                aeris_enabled: device.aeris.enabled,
                aeris_api_client_id: device.aeris.api_client_id.clone(),
                aeris_api_client_secret: device.aeris.api_client_secret.clone(),
                latitude: device.latitude,
                longitude: device.longitude,
                altitude: device.altitude,
            };
            let ack = match client.register_remote_station(request).await {
                Ok(response) => response.into_inner(),
                Err(status) => {
                    tracing::warn!(
                        sink = %sink,
                        station = %device.name,
                        error = %status,
                        "remote registration failed, dropping reading"
                    );
                    return None;
                }
            };
            let Ok(id) = Uuid::parse_str(&ack.station_id) else {
                tracing::warn!(
                    sink = %sink,
                    station = %device.name,
                    ack = %ack.station_id,
                    "remote returned an unparsable station id"
                );
                return None;
            };
            let mut updated = device.clone();
            updated.remote_station_id = Some(id);
            if let Err(err) = provider.update_device(&updated).await {
                tracing::warn!(sink = %sink, error = %err, "failed to persist remote station id");
            }
            tracing::info!(sink = %sink, station = %device.name, %id, "registered with remote core");
            id
        }
    };
    station_ids.insert(reading.station_name.clone(), id);
    wire.station_id = id.to_string();
    Some(wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_to_cap() {
        let cancel = CancellationToken::new();
        let mut backoff = INITIAL_BACKOFF;
        for expected_secs in [1u64, 2, 4, 8, 16, 32, 60, 60] {
            assert_eq!(backoff.as_secs(), expected_secs);
            assert!(sleep_backoff(&mut backoff, &cancel).await);
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }

    #[tokio::test]
    async fn backoff_sleep_aborts_on_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut backoff = MAX_BACKOFF;
        assert!(!sleep_backoff(&mut backoff, &cancel).await);
    }

    #[test]
    fn health_reflects_link_state() {
        let state = LinkState::default();
        assert!(matches!(
            link_health(&state).status,
            crate::store::HealthStatus::Unhealthy
        ));
        state.connected.store(true, Ordering::Relaxed);
        assert!(matches!(
            link_health(&state).status,
            crate::store::HealthStatus::Healthy
        ));
    }
}
