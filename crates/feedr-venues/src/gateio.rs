//! Gate.io spot protocol.
//!
//! Subscribes the `spot.tickers` and `spot.book_ticker` channel pair.
//! `book_ticker` is a one-level full replacement of the book;
//! `tickers` carries last/bid/ask. The subscription set is
//! pre-filtered against REST `/api/v4/spot/currency_pairs` so
//! unlisted pairs never burn a resubscribe cycle; the filter fails
//! soft. Subscribe chunks are paced to respect venue rate limits.

use feedr_book::{BookSnapshot, FeedError, FeedResult};
use feedr_core::symbol::{to_external, to_internal};
use feedr_core::{Price, Qty, TickerSnapshot};
use feedr_ws::{VenueEvent, VenueStream, WsResult};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_WS_URL: &str = "wss://api.gateio.ws/ws/v4/";
const DEFAULT_REST_BASE: &str = "https://api.gateio.ws";
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const CHUNK_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct GateioConfig {
    pub ws_url: String,
    pub rest_base: String,
}

impl Default for GateioConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            rest_base: DEFAULT_REST_BASE.to_string(),
        }
    }
}

pub struct GateioStream {
    config: GateioConfig,
    http: Client,
    /// Listed pairs (internal form) from the last currency_pairs
    /// fetch. Empty means "filter unavailable, subscribe everything".
    listed: RwLock<HashSet<String>>,
}

impl GateioStream {
    pub fn new(config: GateioConfig) -> FeedResult<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| FeedError::Snapshot(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            listed: RwLock::new(HashSet::new()),
        })
    }

    /// `BTCUSDT` -> `BTC_USDT`.
    fn underscored(symbol: &str) -> String {
        to_external(symbol).replace('/', "_")
    }

    async fn refresh_listed_pairs(&self) {
        let url = format!("{}/api/v4/spot/currency_pairs", self.config.rest_base);
        let pairs: Vec<Value> = match self.http.get(&url).send().await {
            Ok(resp) => resp.json().await.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Currency pair filter unavailable, subscribing unfiltered");
                return;
            }
        };

        let listed: HashSet<String> = pairs
            .iter()
            .filter_map(|p| p["id"].as_str())
            .map(to_internal)
            .collect();
        if !listed.is_empty() {
            debug!(pairs = listed.len(), "Currency pair filter refreshed");
            *self.listed.write() = listed;
        }
    }

    fn parse_book_ticker(result: &Value) -> FeedResult<VenueEvent> {
        let symbol = result["s"]
            .as_str()
            .ok_or_else(|| FeedError::Parse("book_ticker missing symbol".to_string()))?;
        let field = |key: &str| -> FeedResult<&str> {
            result[key]
                .as_str()
                .ok_or_else(|| FeedError::Parse(format!("book_ticker missing {key}")))
        };
        let price = |key: &str| -> FeedResult<Price> {
            Price::parse(field(key)?).map_err(|e| FeedError::Parse(e.to_string()))
        };
        let qty = |key: &str| -> FeedResult<Qty> {
            Qty::parse(field(key)?).map_err(|e| FeedError::Parse(e.to_string()))
        };

        Ok(VenueEvent::Replace {
            symbol: to_internal(symbol),
            asks: vec![(price("a")?, qty("A")?)],
            bids: vec![(price("b")?, qty("B")?)],
            sequence: result["u"].as_u64(),
        })
    }

    fn parse_ticker(result: &Value) -> FeedResult<VenueEvent> {
        let symbol = result["currency_pair"]
            .as_str()
            .ok_or_else(|| FeedError::Parse("tickers missing currency_pair".to_string()))?;
        let last = result["last"]
            .as_str()
            .ok_or_else(|| FeedError::Parse("tickers missing last".to_string()))?;
        let last = Price::parse(last).map_err(|e| FeedError::Parse(e.to_string()))?;

        let optional = |key: &str| {
            result[key]
                .as_str()
                .filter(|s| !s.is_empty())
                .and_then(|s| Price::parse(s).ok())
        };

        Ok(VenueEvent::Ticker {
            symbol: to_internal(symbol),
            ticker: TickerSnapshot::new(last, optional("highest_bid"), optional("lowest_ask")),
        })
    }
}

#[async_trait]
impl VenueStream for GateioStream {
    fn name(&self) -> &'static str {
        "gateio"
    }

    async fn endpoint(&self, _symbols: &[String]) -> WsResult<String> {
        self.refresh_listed_pairs().await;
        Ok(self.config.ws_url.clone())
    }

    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        let listed = self.listed.read();
        let payload: Vec<String> = symbols
            .iter()
            .filter(|s| listed.is_empty() || listed.contains(s.as_str()))
            .map(|s| Self::underscored(s))
            .collect();
        if payload.is_empty() {
            return Vec::new();
        }

        let time = Utc::now().timestamp();
        ["spot.tickers", "spot.book_ticker"]
            .iter()
            .map(|channel| {
                json!({
                    "time": time,
                    "channel": channel,
                    "event": "subscribe",
                    "payload": payload,
                })
                .to_string()
            })
            .collect()
    }

    fn chunk_pause(&self) -> Duration {
        CHUNK_PAUSE
    }

    fn client_ping(&self) -> Option<String> {
        Some(json!({"time": Utc::now().timestamp(), "channel": "spot.ping"}).to_string())
    }

    fn decode(&self, raw: &[u8]) -> FeedResult<Vec<VenueEvent>> {
        let value: Value = serde_json::from_slice(raw)?;

        let channel = value["channel"].as_str().unwrap_or_default();
        if channel == "spot.pong" {
            return Ok(vec![VenueEvent::Pong]);
        }

        match value["event"].as_str() {
            Some("subscribe") => Ok(vec![VenueEvent::Ack {
                topic: channel.to_string(),
            }]),
            Some("update") => {
                let result = &value["result"];
                match channel {
                    "spot.book_ticker" => Ok(vec![Self::parse_book_ticker(result)?]),
                    "spot.tickers" => Ok(vec![Self::parse_ticker(result)?]),
                    _ => Ok(vec![VenueEvent::Ignore]),
                }
            }
            _ => Ok(vec![VenueEvent::Ignore]),
        }
    }

    /// One-level books are replaced on every message; there is no
    /// sequenced delta path to resync.
    async fn fetch_snapshot(&self, symbol: &str) -> FeedResult<BookSnapshot> {
        Err(FeedError::Snapshot(format!(
            "{symbol}: book_ticker channel replaces the book per message, REST resync not applicable"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stream() -> GateioStream {
        GateioStream::new(GateioConfig::default()).unwrap()
    }

    #[test]
    fn test_book_ticker_is_one_level_replace() {
        let raw = br#"{
            "time": 1700000000,
            "channel": "spot.book_ticker",
            "event": "update",
            "result": {
                "u": 42,
                "s": "BTC_USDT",
                "b": "49999.5", "B": "1.2",
                "a": "50000.1", "A": "0.8"
            }
        }"#;

        let events = stream().decode(raw).unwrap();
        match &events[0] {
            VenueEvent::Replace {
                symbol,
                asks,
                bids,
                sequence,
            } => {
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(asks, &vec![(Price::new(dec!(50000.1)), Qty::new(dec!(0.8)))]);
                assert_eq!(bids[0].0.inner(), dec!(49999.5));
                assert_eq!(*sequence, Some(42));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_tickers_update() {
        let raw = br#"{
            "channel": "spot.tickers",
            "event": "update",
            "result": {
                "currency_pair": "ETH_USDT",
                "last": "3000.5",
                "highest_bid": "3000.4",
                "lowest_ask": "3000.6"
            }
        }"#;

        let events = stream().decode(raw).unwrap();
        match &events[0] {
            VenueEvent::Ticker { symbol, ticker } => {
                assert_eq!(symbol, "ETHUSDT");
                assert_eq!(ticker.last.inner(), dec!(3000.5));
                assert_eq!(ticker.bid.unwrap().inner(), dec!(3000.4));
                assert_eq!(ticker.ask.unwrap().inner(), dec!(3000.6));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_pong_and_ack() {
        let pong = stream()
            .decode(br#"{"channel": "spot.pong", "event": null}"#)
            .unwrap();
        assert!(matches!(pong[0], VenueEvent::Pong));

        let ack = stream()
            .decode(br#"{"channel": "spot.tickers", "event": "subscribe", "result": {"status": "success"}}"#)
            .unwrap();
        assert!(matches!(ack[0], VenueEvent::Ack { .. }));
    }

    #[test]
    fn test_filter_drops_unlisted_pairs() {
        let s = stream();
        s.listed.write().insert("BTCUSDT".to_string());

        let frames = s.subscribe_frames(&["BTCUSDT".to_string(), "FAKEUSDT".to_string()]);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("BTC_USDT"));
        assert!(!frames[0].contains("FAKE_USDT"));
    }

    #[test]
    fn test_empty_filter_subscribes_everything() {
        let frames = stream().subscribe_frames(&["BTCUSDT".to_string()]);
        assert_eq!(frames.len(), 2);
        assert!(frames[1].contains("spot.book_ticker"));
    }
}
