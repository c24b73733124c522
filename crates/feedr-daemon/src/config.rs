//! Daemon configuration.

use crate::error::{AppError, AppResult};
use feedr_registry::SupervisorConfig;
use feedr_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Venues to run. Empty falls back to the `FEEDR_VENUES`
    /// environment default, else all known venues.
    #[serde(default)]
    pub venues: Vec<String>,

    /// Venues excluded after resolution.
    #[serde(default)]
    pub venues_deny: Vec<String>,

    /// Explicit per-venue symbol lists. Venues absent here get their
    /// symbols from volume discovery.
    #[serde(default)]
    pub symbols: HashMap<String, Vec<String>>,

    /// Symbols picked by volume discovery.
    #[serde(default = "default_auto_symbols")]
    pub auto_symbols: usize,

    /// Poll cadence for REST-only venues (seconds).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Override for per-venue subscribe chunk sizes.
    #[serde(default)]
    pub chunk_size: Option<usize>,

    /// Override for per-venue inter-chunk pauses (ms).
    #[serde(default)]
    pub chunk_pause_ms: Option<u64>,

    /// A symbol with no first update within this window gets
    /// resubscribed (seconds).
    #[serde(default = "default_resubscribe_timeout_secs")]
    pub resubscribe_timeout_secs: u64,

    /// Resubscribe attempts before a symbol is marked exhausted.
    #[serde(default = "default_max_resubscribe_retries")]
    pub max_resubscribe_retries: u32,

    /// When set, venue-advertised ping intervals are ignored
    /// (seconds).
    #[serde(default)]
    pub ping_interval_override_secs: Option<u64>,

    /// Reconnect backoff base (ms).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Reconnect backoff cap (ms).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Bound on each feeder join during shutdown (seconds).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_auto_symbols() -> usize {
    10
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_resubscribe_timeout_secs() -> u64 {
    30
}

fn default_max_resubscribe_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            venues: Vec::new(),
            venues_deny: Vec::new(),
            symbols: HashMap::new(),
            auto_symbols: default_auto_symbols(),
            poll_interval_secs: default_poll_interval_secs(),
            chunk_size: None,
            chunk_pause_ms: None,
            resubscribe_timeout_secs: default_resubscribe_timeout_secs(),
            max_resubscribe_retries: default_max_resubscribe_retries(),
            ping_interval_override_secs: None,
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load from `path` if it exists, else defaults.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Supervisor view of this configuration.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            venues_allow: self.venues.clone(),
            venues_deny: self.venues_deny.clone(),
            symbols: self.symbols.clone(),
            auto_symbols: self.auto_symbols,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            connection: ConnectionConfig {
                backoff_base_ms: self.backoff_base_ms,
                backoff_max_ms: self.backoff_max_ms,
                chunk_size: self.chunk_size,
                chunk_pause_ms: self.chunk_pause_ms,
                resubscribe_timeout_secs: self.resubscribe_timeout_secs,
                max_resubscribe_retries: self.max_resubscribe_retries,
                ping_interval_override_ms: self.ping_interval_override_secs.map(|s| s * 1_000),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.venues.is_empty());
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.max_resubscribe_retries, 3);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            venues = ["binance", "okx"]
            poll_interval_secs = 5

            [symbols]
            binance = ["BTCUSDT", "ETHUSDT"]
            "#,
        )
        .unwrap();

        assert_eq!(config.venues, vec!["binance", "okx"]);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.symbols["binance"].len(), 2);
        // Unspecified keys keep their defaults.
        assert_eq!(config.resubscribe_timeout_secs, 30);
    }

    #[test]
    fn test_supervisor_config_mapping() {
        let config: AppConfig = toml::from_str(
            r#"
            chunk_size = 10
            ping_interval_override_secs = 15
            "#,
        )
        .unwrap();

        let sup = config.supervisor_config();
        assert_eq!(sup.connection.chunk_size, Some(10));
        assert_eq!(sup.connection.ping_interval_override_ms, Some(15_000));
        assert_eq!(sup.poll_interval, Duration::from_secs(10));
    }
}
