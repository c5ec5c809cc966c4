//! Per-sink health ticker. Every sink spawns one of these on start; each
//! tick probes the backend and writes the result into the config store so
//! operator tooling reads one consistent snapshot.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::{ConfigProvider, SinkHealth, StoreError};

pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub fn spawn_health_ticker<F, Fut>(
    sink: String,
    provider: Arc<dyn ConfigProvider>,
    cancel: CancellationToken,
    check: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = SinkHealth> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let health = check().await;
            match provider.update_storage_health(&sink, &health).await {
                Ok(()) => {}
                // A sink bootstrapped from the environment may not have a
                // config row yet; nothing to record against.
                Err(StoreError::NotFound(_)) => {}
                Err(err) => {
                    tracing::warn!(sink = %sink, error = %err, "failed to record sink health")
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HealthStatus, SqliteProvider, StorageBackendConfig, StorageConfig};

    #[tokio::test]
    async fn ticker_records_health_into_store() {
        let store = Arc::new(SqliteProvider::open_in_memory().unwrap());
        store
            .ensure_storage_config(&StorageConfig {
                name: "aprs".to_string(),
                enabled: true,
                backend: StorageBackendConfig::Aprs {
                    server: "noam.aprs2.net:14580".to_string(),
                },
                health: None,
            })
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let provider: Arc<dyn ConfigProvider> = store.clone();
        let handle = spawn_health_ticker("aprs".to_string(), provider, cancel.clone(), || async {
            SinkHealth::healthy("recent send ok")
        });

        // The interval fires its first tick immediately.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let configs = store.get_storage_configs().await.unwrap();
            if configs[0].health.is_some() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "health never recorded");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancel.cancel();
        handle.await.unwrap();

        let configs = store.get_storage_configs().await.unwrap();
        let health = configs[0].health.as_ref().unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.message, "recent send ok");
    }
}
