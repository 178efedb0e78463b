use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::ingest::WatchConfig;

/// Application-level constants
pub const APP_NAME: &str = "labsync";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_WEBHOOK_ADDR: &str = "127.0.0.1:8787";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "labsync=info,axum=warn"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("Cannot determine a data directory; set LABSYNC_DB_PATH")]
    NoDataDir,
}

/// Runtime settings, read from `LABSYNC_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Upload proxy endpoint. Required only by commands that upload.
    pub proxy_url: Option<String>,
    pub api_key: Option<String>,
    pub db_path: PathBuf,
    pub webhook_addr: SocketAddr,
    pub webhook_secret: Option<String>,
    pub http_timeout_secs: u64,
    pub watch: WatchConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = match get("LABSYNC_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };

        let defaults = WatchConfig::default();
        let watch = WatchConfig {
            // A zero window only disables polling.
            poll_window: secs(&get, "LABSYNC_POLL_WINDOW_SECS", defaults.poll_window)?,
            poll_interval: nonzero_secs(&get, "LABSYNC_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            tick_interval: nonzero_secs(&get, "LABSYNC_TICK_INTERVAL_SECS", defaults.tick_interval)?,
            ceiling: nonzero_secs(&get, "LABSYNC_CEILING_SECS", defaults.ceiling)?,
        };

        Ok(Self {
            proxy_url: get("LABSYNC_PROXY_URL"),
            api_key: get("LABSYNC_API_KEY"),
            db_path,
            webhook_addr: parse(
                "LABSYNC_WEBHOOK_ADDR",
                get("LABSYNC_WEBHOOK_ADDR").unwrap_or_else(|| DEFAULT_WEBHOOK_ADDR.to_string()),
            )?,
            webhook_secret: get("LABSYNC_WEBHOOK_SECRET"),
            http_timeout_secs: match get("LABSYNC_HTTP_TIMEOUT_SECS") {
                Some(v) => parse("LABSYNC_HTTP_TIMEOUT_SECS", v)?,
                None => DEFAULT_HTTP_TIMEOUT_SECS,
            },
            watch,
        })
    }

    pub fn require_proxy_url(&self) -> Result<&str, ConfigError> {
        self.proxy_url
            .as_deref()
            .ok_or(ConfigError::Missing("LABSYNC_PROXY_URL"))
    }
}

/// `<data dir>/labsync/labsync.db`
pub fn default_db_path() -> Result<PathBuf, ConfigError> {
    let base = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
    Ok(base.join(APP_NAME).join("labsync.db"))
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

fn secs<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => parse::<u64>(key, v).map(Duration::from_secs),
        None => Ok(default),
    }
}

/// Timer periods must be positive; `tokio::time::interval` panics on zero.
fn nonzero_secs<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = secs(get, key, default)?;
    if value.is_zero() {
        return Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        });
    }
    Ok(value)
}
