//! Aeris Weather forecast controller. Unlike the submit controllers this
//! one pulls: on its cadence it fetches hourly and daily forecasts for
//! every Aeris-enabled device's coordinates and upserts the raw payloads
//! into the `forecasts` table, keyed by location and span. The REST layer
//! maps a station name back to its coordinates to serve them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::store::{ControllerKind, DeviceConfig};

use super::{join_tickers, Controller, ControllerCtx};

pub const DEFAULT_API_ENDPOINT: &str = "https://api.aerisapi.com";

const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastSpan {
    Hourly,
    Daily,
}

impl ForecastSpan {
    pub fn as_str(self) -> &'static str {
        match self {
            ForecastSpan::Hourly => "hourly",
            ForecastSpan::Daily => "daily",
        }
    }

    fn filter(self) -> &'static str {
        match self {
            ForecastSpan::Hourly => "1hr",
            ForecastSpan::Daily => "day",
        }
    }

    fn limit(self) -> u32 {
        match self {
            ForecastSpan::Hourly => 24,
            ForecastSpan::Daily => 7,
        }
    }
}

pub fn forecast_url(endpoint: &str, device: &DeviceConfig, span: ForecastSpan) -> Result<Url> {
    let mut url = Url::parse(endpoint)
        .with_context(|| format!("bad aeris endpoint {endpoint:?}"))?
        .join(&format!(
            "forecasts/{:.4},{:.4}",
            device.latitude, device.longitude
        ))?;
    url.query_pairs_mut()
        .append_pair("format", "json")
        .append_pair("filter", span.filter())
        .append_pair("limit", &span.limit().to_string())
        .append_pair("client_id", &device.aeris.api_client_id)
        .append_pair("client_secret", &device.aeris.api_client_secret);
    Ok(url)
}

pub async fn ensure_forecast_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS forecasts (
    latitude DOUBLE PRECISION NOT NULL,
    longitude DOUBLE PRECISION NOT NULL,
    forecast_span TEXT NOT NULL,
    data JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (latitude, longitude, forecast_span)
)
"#,
    )
    .execute(pool)
    .await
    .context("creating forecasts table")?;
    Ok(())
}

pub async fn upsert_forecast(
    pool: &PgPool,
    device: &DeviceConfig,
    span: ForecastSpan,
    data: &JsonValue,
) -> Result<()> {
    sqlx::query(
        r#"
INSERT INTO forecasts (latitude, longitude, forecast_span, data, updated_at)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (latitude, longitude, forecast_span) DO UPDATE SET
    data = excluded.data,
    updated_at = excluded.updated_at
"#,
    )
    .bind(device.latitude)
    .bind(device.longitude)
    .bind(span.as_str())
    .bind(data)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub struct AerisController {
    ctx: ControllerCtx,
    endpoint: String,
    interval: Duration,
    cancel: CancellationToken,
    ticker: Vec<JoinHandle<()>>,
}

impl AerisController {
    pub fn new(
        ctx: ControllerCtx,
        endpoint: Option<String>,
        fetch_interval_secs: Option<u64>,
        cancel: CancellationToken,
    ) -> AerisController {
        AerisController {
            ctx,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
            interval: fetch_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_FETCH_INTERVAL),
            cancel,
            ticker: Vec::new(),
        }
    }

    async fn fetch_all(ctx: &ControllerCtx, endpoint: &str) {
        let pool = {
            let reader = ctx.reader.read().await;
            match reader.as_ref() {
                Some(reader) => reader.pool().clone(),
                None => {
                    tracing::debug!("no time-series store, skipping forecast fetch");
                    return;
                }
            }
        };
        if let Err(err) = ensure_forecast_table(&pool).await {
            tracing::warn!(error = %err, "forecast table setup failed");
            return;
        }

        let devices = match ctx.provider.get_devices().await {
            Ok(devices) => devices,
            Err(err) => {
                tracing::warn!(error = %err, "device enumeration failed");
                return;
            }
        };
        for device in devices {
            if !device.enabled
                || !device.aeris.enabled
                || device.aeris.api_client_id.is_empty()
                || device.aeris.api_client_secret.is_empty()
            {
                continue;
            }
            let endpoint = device.aeris.api_endpoint.as_deref().unwrap_or(endpoint);
            for span in [ForecastSpan::Hourly, ForecastSpan::Daily] {
                match Self::fetch_span(ctx, endpoint, &device, span).await {
                    Ok(()) => {
                        tracing::debug!(station = %device.name, span = span.as_str(), "forecast stored")
                    }
                    Err(err) => {
                        tracing::warn!(
                            station = %device.name,
                            span = span.as_str(),
                            error = %err,
                            "forecast fetch failed"
                        );
                    }
                }
            }
        }
    }

    async fn fetch_span(
        ctx: &ControllerCtx,
        endpoint: &str,
        device: &DeviceConfig,
        span: ForecastSpan,
    ) -> Result<()> {
        let url = forecast_url(endpoint, device, span)?;
        let payload: JsonValue = ctx
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let pool = {
            let reader = ctx.reader.read().await;
            reader
                .as_ref()
                .map(|r| r.pool().clone())
                .context("time-series store went away")?
        };
        upsert_forecast(&pool, device, span, &payload).await
    }

}

#[async_trait]
impl Controller for AerisController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Aeris
    }

    async fn start(&mut self) -> Result<()> {
        let ctx = self.ctx.clone();
        let endpoint = self.endpoint.clone();
        let interval = self.interval;
        let cancel = self.cancel.child_token();
        self.ticker.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => AerisController::fetch_all(&ctx, &endpoint).await,
                }
            }
            tracing::debug!(controller = "aeris", "fetch loop exited");
        }));
        tracing::info!(interval = ?self.interval, "aeris forecast fetches scheduled");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        join_tickers(ControllerKind::Aeris, &mut self.ticker).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AerisService;

    #[test]
    fn forecast_urls_embed_location_and_span() {
        let device = DeviceConfig {
            name: "backyard".to_string(),
            kind_tag: "davis".to_string(),
            latitude: 39.7392,
            longitude: -104.9903,
            aeris: AerisService {
                enabled: true,
                api_client_id: "cid".to_string(),
                api_client_secret: "csecret".to_string(),
                api_endpoint: None,
            },
            ..Default::default()
        };

        let hourly = forecast_url(DEFAULT_API_ENDPOINT, &device, ForecastSpan::Hourly).unwrap();
        assert!(hourly.path().contains("forecasts/39.7392,-104.9903"));
        assert!(hourly.query().unwrap().contains("filter=1hr"));
        assert!(hourly.query().unwrap().contains("limit=24"));

        let daily = forecast_url(DEFAULT_API_ENDPOINT, &device, ForecastSpan::Daily).unwrap();
        assert!(daily.query().unwrap().contains("filter=day"));
        assert!(daily.query().unwrap().contains("limit=7"));
        assert!(daily.query().unwrap().contains("client_id=cid"));
    }
}
