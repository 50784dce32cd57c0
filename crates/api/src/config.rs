// Membership API configuration.
//
// Every setting is read from `ACSP_MEMBERS_*` environment variables with
// defaults suitable for local development.

use std::{net::SocketAddr, time::Duration};

use crate::db::pool::PoolConfig;

const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string. Absent means the in-memory store.
    pub database_url: Option<String>,
    pub log_filter: String,
    pub log_format: LogFormat,
    pub pool: PoolConfig,
    pub run_migrations: bool,
}

impl ApiConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `ACSP_MEMBERS_HOST` | `0.0.0.0` |
    /// | `ACSP_MEMBERS_PORT` | `8080` |
    /// | `ACSP_MEMBERS_DATABASE_URL` | *(none, in-memory store)* |
    /// | `ACSP_MEMBERS_LOG_FILTER` | `info` |
    /// | `ACSP_MEMBERS_LOG_FORMAT` | `text` |
    /// | `ACSP_MEMBERS_DB_MIN_CONNECTIONS` | `2` |
    /// | `ACSP_MEMBERS_DB_MAX_CONNECTIONS` | `20` |
    /// | `ACSP_MEMBERS_DB_ACQUIRE_TIMEOUT_SECS` | `10` |
    /// | `ACSP_MEMBERS_RUN_MIGRATIONS` | `true` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    pub(crate) fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("ACSP_MEMBERS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("ACSP_MEMBERS_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let database_url =
            env("ACSP_MEMBERS_DATABASE_URL").ok().filter(|value| !value.trim().is_empty());

        let log_filter = env("ACSP_MEMBERS_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("ACSP_MEMBERS_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let defaults = PoolConfig::default();
        let pool = PoolConfig {
            min_connections: env("ACSP_MEMBERS_DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_connections),
            max_connections: env("ACSP_MEMBERS_DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            acquire_timeout: env("ACSP_MEMBERS_DB_ACQUIRE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
        };

        let run_migrations = !matches!(
            env("ACSP_MEMBERS_RUN_MIGRATIONS").as_deref(),
            Ok("false") | Ok("0") | Ok("no")
        );

        Self { listen_addr, database_url, log_filter, log_format, pool, run_migrations }
    }
}
