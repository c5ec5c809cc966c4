//! Process-level configuration from the environment. Durable device,
//! sink, and controller configuration lives in the SQLite store; the
//! environment only says where that store is, where to listen, and
//! optionally seeds sink rows on first start.

use anyhow::Result;
use dotenvy::dotenv;
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    /// Path of the SQLite config store.
    pub config_db_path: String,
    /// Management/REST API listen address.
    pub http_listen: String,
    /// Bearer token required by mutating management routes.
    pub api_token: Option<String>,
    /// Seeds a `timescaledb` storage row at startup when set.
    pub timescaledb_dsn: Option<String>,
    /// Seeds a `grpc` storage row at startup when set.
    pub grpc_endpoint: Option<String>,
    /// Seeds an `aprs` storage row at startup when set.
    pub aprs_server: Option<String>,
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let config_db_path =
            non_empty("WEATHER_CONFIG_DB").unwrap_or_else(|| "weather-core.db".to_string());
        let http_listen =
            non_empty("WEATHER_HTTP_LISTEN").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let api_token = non_empty("WEATHER_API_TOKEN");
        let timescaledb_dsn = non_empty("WEATHER_TIMESCALEDB_DSN");
        let grpc_endpoint = non_empty("WEATHER_GRPC_ENDPOINT");
        let aprs_server = non_empty("WEATHER_APRS_SERVER");

        Ok(Config {
            config_db_path,
            http_listen,
            api_token,
            timescaledb_dsn,
            grpc_endpoint,
            aprs_server,
        })
    }
}
