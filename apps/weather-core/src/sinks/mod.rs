//! Storage sinks. Each sink owns a writer task fed by a bounded inbox the
//! distribution bus fans out into. Sinks are independent: one failing sink
//! loses its own readings and nothing else.

pub mod aprs;
pub mod grpc;
pub mod health;
pub mod timescale;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::Reading;
use crate::store::SinkHealth;

/// How long `stop()` waits for a writer before abandoning it.
pub const STOP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Connects the backend, spawns its writer, and returns the writer's
    /// inbox for bus registration. Startup failure is an error; writer
    /// failures after startup are the sink's own business.
    async fn start(&mut self, cancel: CancellationToken)
        -> anyhow::Result<mpsc::Sender<Reading>>;

    /// Idempotent. Returns once the writer has drained or the stop timeout
    /// elapsed.
    async fn stop(&mut self) -> anyhow::Result<()>;

    /// Liveness probe used by the health ticker.
    async fn health_check(&self) -> SinkHealth;
}

pub(crate) async fn join_writer(
    name: &str,
    handle: &mut Option<tokio::task::JoinHandle<()>>,
) {
    if let Some(handle) = handle.take() {
        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(sink = name, error = %err, "writer panicked"),
            Err(_) => {
                tracing::warn!(sink = name, "writer did not stop within timeout, abandoning")
            }
        }
    }
}
