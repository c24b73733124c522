//! Feeder startup/shutdown orchestration.
//!
//! The supervisor resolves which venues to run and which symbols each
//! should carry, builds the feeders, and drives bounded shutdown. One
//! venue failing to build or start never takes the others down.

use crate::error::{RegistryError, RegistryResult};
use crate::registry::FeedRegistry;
use feedr_venues::{
    BinanceConfig, BinanceStream, Feeder, GateioConfig, GateioStream, HuobiConfig, HuobiStream,
    KucoinConfig, KucoinStream, OkxTickerSource, PollingFeeder, WsFeeder,
};
use feedr_ws::ConnectionConfig;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// All venues this build knows how to run.
pub const KNOWN_VENUES: &[&str] = &["binance", "kucoin", "huobi", "gateio", "okx"];

/// Symbols used when neither config nor volume discovery yields any.
const FALLBACK_SYMBOLS: &[&str] = &["BTCUSDT", "ETHUSDT", "SOLUSDT"];

/// Environment default for the venue set (comma-separated).
const VENUES_ENV: &str = "FEEDR_VENUES";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Explicit venue allow-list; empty falls back to `FEEDR_VENUES`
    /// or all known venues.
    pub venues_allow: Vec<String>,
    /// Venues filtered out after resolution.
    pub venues_deny: Vec<String>,
    /// Explicit per-venue symbol lists (internal form).
    pub symbols: HashMap<String, Vec<String>>,
    /// Symbols picked by volume discovery when no explicit list is
    /// configured.
    pub auto_symbols: usize,
    /// Poll cadence for REST-only venues.
    pub poll_interval: Duration,
    pub connection: ConnectionConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            venues_allow: Vec::new(),
            venues_deny: Vec::new(),
            symbols: HashMap::new(),
            auto_symbols: 10,
            poll_interval: Duration::from_secs(10),
            connection: ConnectionConfig::default(),
        }
    }
}

pub struct FeederSupervisor {
    config: SupervisorConfig,
    http: Client,
}

impl FeederSupervisor {
    pub fn new(config: SupervisorConfig) -> RegistryResult<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| RegistryError::Http(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    /// Venues to run: explicit allow-list, else the `FEEDR_VENUES`
    /// environment default, else all known; deny-list filters after.
    pub fn resolve_venues(&self) -> Vec<String> {
        let candidates: Vec<String> = if !self.config.venues_allow.is_empty() {
            self.config.venues_allow.clone()
        } else if let Ok(env) = std::env::var(VENUES_ENV) {
            env.split(',').map(str::to_string).collect()
        } else {
            KNOWN_VENUES.iter().map(|v| v.to_string()).collect()
        };

        let deny: Vec<String> = self
            .config
            .venues_deny
            .iter()
            .map(|v| v.trim().to_lowercase())
            .collect();

        candidates
            .iter()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .filter(|v| {
                if !KNOWN_VENUES.contains(&v.as_str()) {
                    warn!(venue = %v, "Skipping unknown venue");
                    return false;
                }
                !deny.contains(v)
            })
            .collect()
    }

    /// Symbols for one venue: explicit config, else top-by-volume
    /// discovery (best-effort), else a small hardcoded default.
    pub async fn resolve_symbols(&self, venue: &str) -> Vec<String> {
        if let Some(symbols) = self.config.symbols.get(venue) {
            if !symbols.is_empty() {
                return symbols.clone();
            }
        }

        match self.top_by_volume(self.config.auto_symbols).await {
            Ok(symbols) if !symbols.is_empty() => {
                info!(venue, count = symbols.len(), "Symbols discovered by volume");
                symbols
            }
            Ok(_) => FALLBACK_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            Err(e) => {
                warn!(venue, error = %e, "Volume discovery failed, using defaults");
                FALLBACK_SYMBOLS.iter().map(|s| s.to_string()).collect()
            }
        }
    }

    /// Top USDT pairs by 24 h quote volume, from the Binance public
    /// ticker endpoint.
    async fn top_by_volume(&self, count: usize) -> RegistryResult<Vec<String>> {
        let url = "https://api.binance.com/api/v3/ticker/24hr";
        let tickers: Vec<Value> = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RegistryError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| RegistryError::Http(e.to_string()))?;

        let mut ranked: Vec<(String, f64)> = tickers
            .iter()
            .filter_map(|t| {
                let symbol = t["symbol"].as_str()?;
                if !symbol.ends_with("USDT") {
                    return None;
                }
                let volume: f64 = t["quoteVolume"].as_str()?.parse().ok()?;
                Some((symbol.to_string(), volume))
            })
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked.into_iter().take(count).map(|(s, _)| s).collect())
    }

    /// Build one feeder. Building never touches the network.
    pub fn build_feeder(
        &self,
        venue: &str,
        symbols: Vec<String>,
    ) -> RegistryResult<Arc<dyn Feeder>> {
        let connection = self.config.connection.clone();
        let config_err = |e: feedr_book::FeedError| RegistryError::Config(e.to_string());

        let feeder: Arc<dyn Feeder> = match venue {
            "binance" => Arc::new(WsFeeder::new(
                BinanceStream::new(BinanceConfig::default()).map_err(config_err)?,
                symbols,
                connection,
            )),
            "kucoin" => Arc::new(WsFeeder::new(
                KucoinStream::new(KucoinConfig::default()).map_err(config_err)?,
                symbols,
                connection,
            )),
            "huobi" => Arc::new(WsFeeder::new(
                HuobiStream::new(HuobiConfig::default()),
                symbols,
                connection,
            )),
            "gateio" => Arc::new(WsFeeder::new(
                GateioStream::new(GateioConfig::default()).map_err(config_err)?,
                symbols,
                connection,
            )),
            "okx" => Arc::new(PollingFeeder::new(
                OkxTickerSource::new().map_err(config_err)?,
                symbols,
                self.config.poll_interval,
            )),
            other => return Err(RegistryError::UnknownVenue(other.to_string())),
        };
        Ok(feeder)
    }

    /// Build, start and register every resolved venue. A failing
    /// venue is logged and skipped.
    pub async fn start_all(&self, registry: &FeedRegistry) {
        for venue in self.resolve_venues() {
            let symbols = self.resolve_symbols(&venue).await;

            match self.build_feeder(&venue, symbols) {
                Ok(feeder) => {
                    feeder.start().await;
                    registry.register(Arc::clone(&feeder));
                    info!(venue = %venue, "Feeder started");
                }
                Err(e) => {
                    warn!(venue = %venue, error = %e, "Feeder failed to build, skipping");
                }
            }
        }
        info!(feeders = registry.len(), "Startup complete");
    }

    /// Unregister and stop every managed feeder, each join bounded by
    /// `timeout`.
    pub async fn stop_all(&self, registry: &FeedRegistry, timeout: Duration) {
        for (id, feeder) in registry.list() {
            registry.unregister(&id);
            feeder.stop(timeout).await;
            info!(venue = %id, "Feeder stopped");
        }
        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor(config: SupervisorConfig) -> FeederSupervisor {
        FeederSupervisor::new(config).unwrap()
    }

    #[test]
    fn test_explicit_allow_list_wins() {
        let s = supervisor(SupervisorConfig {
            venues_allow: vec!["Binance".to_string(), "OKX".to_string()],
            ..Default::default()
        });
        assert_eq!(s.resolve_venues(), vec!["binance", "okx"]);
    }

    #[test]
    fn test_deny_filters_after_resolution() {
        let s = supervisor(SupervisorConfig {
            venues_allow: vec!["binance".to_string(), "huobi".to_string()],
            venues_deny: vec!["HUOBI".to_string()],
            ..Default::default()
        });
        assert_eq!(s.resolve_venues(), vec!["binance"]);
    }

    #[test]
    fn test_unknown_venues_are_skipped() {
        let s = supervisor(SupervisorConfig {
            venues_allow: vec!["binance".to_string(), "kraken".to_string()],
            ..Default::default()
        });
        assert_eq!(s.resolve_venues(), vec!["binance"]);
    }

    #[test]
    fn test_build_feeder_rejects_unknown_venue() {
        let s = supervisor(SupervisorConfig::default());
        let err = s.build_feeder("kraken", Vec::new()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownVenue(_)));
    }

    #[test]
    fn test_build_feeder_for_all_known_venues() {
        let s = supervisor(SupervisorConfig::default());
        for venue in KNOWN_VENUES {
            let feeder = s
                .build_feeder(venue, vec!["BTCUSDT".to_string()])
                .unwrap_or_else(|e| panic!("{venue} failed to build: {e}"));
            assert_eq!(feeder.id(), *venue);
        }
    }

    #[tokio::test]
    async fn test_explicit_symbols_skip_discovery() {
        let mut symbols = HashMap::new();
        symbols.insert("huobi".to_string(), vec!["BTCUSDT".to_string()]);
        let s = supervisor(SupervisorConfig {
            symbols,
            ..Default::default()
        });

        assert_eq!(s.resolve_symbols("huobi").await, vec!["BTCUSDT"]);
    }
}
