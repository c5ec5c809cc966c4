//! Management and data API. Mutating routes take a bearer token; data
//! routes serve the REST surface downstream consumers rely on: latest
//! reading, time spans, snow totals with cache-first semantics, and the
//! remote-station inventory.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

use crate::bus::ReadingBus;
use crate::managers::{ControllerManager, ReloadReport, StationManager, StorageManager};
use crate::model::Reading;
use crate::receiver::{presence_status, RemoteRegistry};
use crate::sinks::timescale::TimescaleReader;
use crate::snow;
use crate::store::{ConfigProvider, SnowTotals, StoreError};

#[derive(Clone)]
pub struct AppState {
    /// Overlaid provider: remote stations appear as devices.
    pub provider: Arc<dyn ConfigProvider>,
    pub registry: Arc<RemoteRegistry>,
    pub reader: Arc<RwLock<Option<TimescaleReader>>>,
    pub bus: Arc<ReadingBus>,
    pub stations: Arc<StationManager>,
    pub storage: Arc<StorageManager>,
    pub controllers: Arc<ControllerManager>,
    pub api_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/latest", get(latest_handler))
        .route("/span/{span}", get(span_handler))
        .route("/api/snow", get(snow_handler))
        .route("/api/remote-stations", get(remote_stations_handler))
        .route("/api/config/reload", post(reload_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn check_bearer(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let Some(expected) = &state.api_token else {
        return Err((
            StatusCode::UNAUTHORIZED,
            "management token not configured".to_string(),
        ));
    };
    let supplied = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if supplied == Some(expected.as_str()) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid bearer token".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    sink_drops: HashMap<String, u64>,
}

async fn healthz_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sink_drops: state.bus.sink_drops().await,
    })
}

#[derive(Debug, Deserialize)]
struct StationQuery {
    station: String,
}

async fn latest_handler(
    State(state): State<AppState>,
    Query(query): Query<StationQuery>,
) -> Result<Json<Reading>, (StatusCode, String)> {
    let reader = require_reader(&state).await?;
    match reader.get_latest(&query.station).await {
        Ok(Some(reading)) => Ok(Json(reading)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            format!("no readings for station {:?}", query.station),
        )),
        Err(err) => {
            tracing::error!(error = %err, "latest query failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "query failed".to_string()))
        }
    }
}

/// Span segments look like `24h`.
fn parse_span_hours(span: &str) -> Option<i64> {
    span.strip_suffix('h')?.parse::<i64>().ok().filter(|h| (1..=24 * 366).contains(h))
}

async fn span_handler(
    State(state): State<AppState>,
    Path(span): Path<String>,
    Query(query): Query<StationQuery>,
) -> Result<Json<Vec<Reading>>, (StatusCode, String)> {
    let Some(hours) = parse_span_hours(&span) else {
        return Err((StatusCode::BAD_REQUEST, format!("bad span {span:?}")));
    };
    let reader = require_reader(&state).await?;
    match reader.get_span(&query.station, hours).await {
        Ok(readings) => Ok(Json(readings)),
        Err(err) => {
            tracing::error!(error = %err, "span query failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "query failed".to_string()))
        }
    }
}

#[derive(Debug, Serialize)]
struct SnowResponse {
    station_name: String,
    snowfall: SnowTotals,
    snow_depth_mm: f64,
    source: &'static str,
}

async fn snow_handler(
    State(state): State<AppState>,
    Query(query): Query<StationQuery>,
) -> Result<Json<SnowResponse>, (StatusCode, String)> {
    let devices = state
        .provider
        .get_devices()
        .await
        .map_err(internal_error)?;
    let Some(device) = devices.iter().find(|d| d.name == query.station) else {
        return Err((
            StatusCode::NOT_FOUND,
            format!("unknown station {:?}", query.station),
        ));
    };

    let cached = state
        .provider
        .get_snow_totals(&query.station)
        .await
        .map_err(internal_error)?;
    let (totals, source) = match cached {
        Some(totals) if snow::is_fresh(&totals, Utc::now()) => (totals, "cache"),
        _ => {
            // Cache missed its window; compute inline with the same routine.
            let reader = require_reader(&state).await?;
            let totals = snow::compute_totals(&reader, &query.station)
                .await
                .map_err(|err| {
                    tracing::error!(error = %err, "inline snow computation failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "snow computation failed".to_string(),
                    )
                })?;
            (totals, "live")
        }
    };

    let depth = {
        let reader = require_reader(&state).await?;
        match reader.get_latest(&query.station).await {
            Ok(Some(reading)) => snow::snow_depth_mm(device.base_snow_distance, reading.snow_distance),
            _ => 0.0,
        }
    };

    Ok(Json(SnowResponse {
        station_name: query.station,
        snowfall: totals,
        snow_depth_mm: depth,
        source,
    }))
}

#[derive(Debug, Serialize)]
struct RemoteStationSummary {
    station_id: String,
    station_name: String,
    station_type: String,
    aprs_enabled: bool,
    wu_enabled: bool,
    pws_enabled: bool,
    aeris_enabled: bool,
    last_seen: chrono::DateTime<Utc>,
    status: &'static str,
}

async fn remote_stations_handler(
    State(state): State<AppState>,
) -> Json<Vec<RemoteStationSummary>> {
    let now = Utc::now();
    let stations = state
        .registry
        .snapshot()
        .await
        .into_iter()
        .map(|station| RemoteStationSummary {
            station_id: station.station_id.to_string(),
            station_name: station.station_name,
            station_type: station.station_type,
            aprs_enabled: station.aprs_enabled,
            wu_enabled: station.wu_enabled,
            pws_enabled: station.pws_enabled,
            aeris_enabled: station.aeris_enabled,
            last_seen: station.last_seen,
            status: presence_status(station.last_seen, now),
        })
        .collect();
    Json(stations)
}

#[derive(Debug, Serialize)]
struct ReloadResponse {
    success: bool,
    message: String,
    timestamp: chrono::DateTime<Utc>,
}

/// Revalidates the store and applies it: sinks first, then stations, then
/// controllers. A validation failure leaves the running configuration
/// untouched.
async fn reload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ReloadResponse>, (StatusCode, String)> {
    check_bearer(&state, &headers)?;

    let tree = match state.provider.load_config().await {
        Ok(tree) => tree,
        Err(StoreError::Validation(errors)) => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("configuration invalid: {}", errors.join("; ")),
            ));
        }
        Err(err) => return Err(internal_error(err)),
    };

    let mut report = ReloadReport::default();
    report.merge(state.storage.reload_config(&tree.storage).await);
    report.merge(state.stations.reload_config(&tree.devices).await);
    report.merge(state.controllers.reload_config(&tree.controllers).await);

    let message = format!(
        "{} added, {} removed, {} restarted{}",
        report.added.len(),
        report.removed.len(),
        report.restarted.len(),
        if report.errors.is_empty() {
            String::new()
        } else {
            format!("; errors: {}", report.errors.join("; "))
        }
    );
    tracing::info!(%message, "config reload applied");
    Ok(Json(ReloadResponse {
        success: report.errors.is_empty(),
        message,
        timestamp: Utc::now(),
    }))
}

async fn require_reader(
    state: &AppState,
) -> Result<TimescaleReader, (StatusCode, String)> {
    state.reader.read().await.clone().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "time-series store not available".to_string(),
    ))
}

fn internal_error(err: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!(error = %err, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal error".to_string(),
    )
}
