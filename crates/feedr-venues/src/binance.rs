//! Binance spot protocol.
//!
//! Uses the combined-stream endpoint so all depth and trade topics
//! ride one connection. `depthUpdate` events carry `U`/`u` sequence
//! bounds and feed the sequence-aware book path; snapshots come from
//! REST `/api/v3/depth`. `aggTrade` drives the ticker last price.
//! When an API key is configured a listen key is acquired and
//! appended as one more stream.

use feedr_book::{BookSnapshot, DepthDelta, FeedError, FeedResult};
use feedr_core::symbol::to_internal;
use feedr_core::{Price, Qty, TickerSnapshot};
use feedr_ws::{VenueEvent, VenueStream, WsError, WsResult};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_WS_BASE: &str = "wss://stream.binance.com:9443";
const DEFAULT_REST_BASE: &str = "https://api.binance.com";
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Levels requested per REST depth snapshot.
const SNAPSHOT_LIMIT: u32 = 1000;

/// Binance endpoints and credentials.
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub ws_base: String,
    pub rest_base: String,
    /// Enables listen-key acquisition when set.
    pub api_key: Option<String>,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            ws_base: DEFAULT_WS_BASE.to_string(),
            rest_base: DEFAULT_REST_BASE.to_string(),
            api_key: None,
        }
    }
}

pub struct BinanceStream {
    config: BinanceConfig,
    http: Client,
    request_id: AtomicU64,
}

impl BinanceStream {
    pub fn new(config: BinanceConfig) -> FeedResult<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| FeedError::Snapshot(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            request_id: AtomicU64::new(1),
        })
    }

    fn stream_names(symbols: &[String]) -> Vec<String> {
        let mut names = Vec::with_capacity(symbols.len() * 2);
        for symbol in symbols {
            let lower = symbol.to_lowercase();
            names.push(format!("{lower}@depth@100ms"));
            names.push(format!("{lower}@aggTrade"));
        }
        names
    }

    /// Acquire a user-data listen key. Best-effort: failure only
    /// drops the user stream, never the market streams.
    async fn fetch_listen_key(&self, api_key: &str) -> Option<String> {
        let url = format!("{}/api/v3/userDataStream", self.config.rest_base);
        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await;

        match response {
            Ok(resp) => match resp.json::<Value>().await {
                Ok(body) => {
                    let key = body["listenKey"].as_str().map(str::to_string);
                    if key.is_none() {
                        warn!("Listen key missing from response");
                    }
                    key
                }
                Err(e) => {
                    warn!(error = %e, "Listen key response unreadable");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Listen key request failed");
                None
            }
        }
    }

    fn parse_depth_update(data: &Value) -> FeedResult<DepthDelta> {
        let symbol = data["s"]
            .as_str()
            .ok_or_else(|| FeedError::Parse("depthUpdate missing symbol".to_string()))?;
        let seq_start = data["U"]
            .as_u64()
            .ok_or_else(|| FeedError::Parse("depthUpdate missing U".to_string()))?;
        let seq_end = data["u"]
            .as_u64()
            .ok_or_else(|| FeedError::Parse("depthUpdate missing u".to_string()))?;

        Ok(DepthDelta {
            symbol: to_internal(symbol),
            seq_start,
            seq_end: Some(seq_end),
            asks: parse_levels(&data["a"])?,
            bids: parse_levels(&data["b"])?,
        })
    }

    fn parse_agg_trade(data: &Value) -> FeedResult<VenueEvent> {
        let symbol = data["s"]
            .as_str()
            .ok_or_else(|| FeedError::Parse("aggTrade missing symbol".to_string()))?;
        let price = data["p"]
            .as_str()
            .ok_or_else(|| FeedError::Parse("aggTrade missing price".to_string()))?;
        let last = Price::parse(price).map_err(|e| FeedError::Parse(e.to_string()))?;

        Ok(VenueEvent::Ticker {
            symbol: to_internal(symbol),
            ticker: TickerSnapshot::new(last, None, None),
        })
    }
}

#[async_trait]
impl VenueStream for BinanceStream {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn endpoint(&self, symbols: &[String]) -> WsResult<String> {
        let mut streams = Self::stream_names(symbols);

        if let Some(api_key) = &self.config.api_key {
            match self.fetch_listen_key(api_key).await {
                Some(key) => {
                    info!("User data stream attached");
                    streams.push(key);
                }
                None => warn!("Continuing without user data stream"),
            }
        }

        if streams.is_empty() {
            return Err(WsError::Protocol("No streams to subscribe".to_string()));
        }
        Ok(format!(
            "{}/stream?streams={}",
            self.config.ws_base,
            streams.join("/")
        ))
    }

    /// The combined-stream URL already carries the topics; these
    /// SUBSCRIBE frames are idempotent and serve the resubscribe scan.
    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        if symbols.is_empty() {
            return Vec::new();
        }
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let params: Vec<String> = Self::stream_names(symbols);
        vec![json!({
            "method": "SUBSCRIBE",
            "params": params,
            "id": id,
        })
        .to_string()]
    }

    fn chunk_size(&self) -> usize {
        30
    }

    fn decode(&self, raw: &[u8]) -> FeedResult<Vec<VenueEvent>> {
        let value: Value = serde_json::from_slice(raw)?;

        // SUBSCRIBE command acknowledgement.
        if value.get("result").is_some() && value.get("id").is_some() {
            return Ok(vec![VenueEvent::Ack {
                topic: value["id"].to_string(),
            }]);
        }

        // Combined-stream envelope.
        let (stream, data) = match (value.get("stream"), value.get("data")) {
            (Some(Value::String(stream)), Some(data)) => (stream.as_str(), data),
            _ => return Ok(vec![VenueEvent::Ignore]),
        };

        match data["e"].as_str() {
            Some("depthUpdate") => Ok(vec![VenueEvent::Delta(Self::parse_depth_update(data)?)]),
            Some("aggTrade") => Ok(vec![Self::parse_agg_trade(data)?]),
            _ => {
                debug!(stream, "Unhandled stream event");
                Ok(vec![VenueEvent::Ignore])
            }
        }
    }

    async fn fetch_snapshot(&self, symbol: &str) -> FeedResult<BookSnapshot> {
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.config.rest_base,
            to_internal(symbol),
            SNAPSHOT_LIMIT
        );

        let body: Value = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::Snapshot(e.to_string()))?
            .json()
            .await
            .map_err(|e| FeedError::Snapshot(e.to_string()))?;

        let sequence = body["lastUpdateId"]
            .as_u64()
            .ok_or_else(|| FeedError::Snapshot("missing lastUpdateId".to_string()))?;

        Ok(BookSnapshot {
            symbol: to_internal(symbol),
            asks: parse_levels(&body["asks"])?,
            bids: parse_levels(&body["bids"])?,
            sequence,
        })
    }
}

/// Parse `[["price","qty"], ...]` level arrays.
fn parse_levels(value: &Value) -> FeedResult<Vec<(Price, Qty)>> {
    let Some(entries) = value.as_array() else {
        return Ok(Vec::new());
    };

    let mut levels = Vec::with_capacity(entries.len());
    for entry in entries {
        let (Some(price), Some(qty)) = (entry[0].as_str(), entry[1].as_str()) else {
            return Err(FeedError::Parse(format!("Malformed level: {entry}")));
        };
        levels.push((
            Price::parse(price).map_err(|e| FeedError::Parse(e.to_string()))?,
            Qty::parse(qty).map_err(|e| FeedError::Parse(e.to_string()))?,
        ));
    }
    Ok(levels)
}
