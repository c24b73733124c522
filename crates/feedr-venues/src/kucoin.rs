//! KuCoin spot protocol.
//!
//! Connecting requires a REST handshake: `POST /api/v1/bullet-public`
//! hands back a temporary token, the actual WS endpoint and the ping
//! cadence the server expects. `/market/level2` deltas carry
//! `sequenceStart`/`sequenceEnd` and feed the sequence-aware book
//! path; snapshots come from REST `level2_100`. Keepalive is a
//! client-shaped `{"id","type":"ping"}` frame.

use feedr_book::{BookSnapshot, DepthDelta, FeedError, FeedResult};
use feedr_core::symbol::{to_external, to_internal};
use feedr_core::{Price, Qty};
use feedr_ws::{VenueEvent, VenueStream, WsError, WsResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_REST_BASE: &str = "https://api.kucoin.com";
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct KucoinConfig {
    pub rest_base: String,
}

impl Default for KucoinConfig {
    fn default() -> Self {
        Self {
            rest_base: DEFAULT_REST_BASE.to_string(),
        }
    }
}

pub struct KucoinStream {
    config: KucoinConfig,
    http: Client,
    request_id: AtomicU64,
    /// Ping cadence (ms) from the last bullet-public handshake,
    /// surfaced on the welcome message.
    advertised_ping_ms: RwLock<Option<u64>>,
}

impl KucoinStream {
    pub fn new(config: KucoinConfig) -> FeedResult<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| FeedError::Snapshot(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            request_id: AtomicU64::new(1),
            advertised_ping_ms: RwLock::new(None),
        })
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// `BTCUSDT` -> `BTC-USDT`.
    fn dashed(symbol: &str) -> String {
        to_external(symbol).replace('/', "-")
    }

    fn parse_l2_update(data: &Value) -> FeedResult<DepthDelta> {
        let symbol = data["symbol"]
            .as_str()
            .ok_or_else(|| FeedError::Parse("l2update missing symbol".to_string()))?;
        let seq_start = data["sequenceStart"]
            .as_u64()
            .ok_or_else(|| FeedError::Parse("l2update missing sequenceStart".to_string()))?;
        let seq_end = data["sequenceEnd"].as_u64();

        Ok(DepthDelta {
            symbol: to_internal(symbol),
            seq_start,
            seq_end,
            asks: parse_changes(&data["changes"]["asks"])?,
            bids: parse_changes(&data["changes"]["bids"])?,
        })
    }
}

#[async_trait]
impl VenueStream for KucoinStream {
    fn name(&self) -> &'static str {
        "kucoin"
    }

    async fn endpoint(&self, _symbols: &[String]) -> WsResult<String> {
        let url = format!("{}/api/v1/bullet-public", self.config.rest_base);
        let body: Value = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| WsError::Handshake(e.to_string()))?
            .json()
            .await
            .map_err(|e| WsError::Handshake(e.to_string()))?;

        let data = &body["data"];
        let token = data["token"]
            .as_str()
            .ok_or_else(|| WsError::Handshake("bullet-public missing token".to_string()))?;
        let server = data["instanceServers"]
            .get(0)
            .ok_or_else(|| WsError::Handshake("bullet-public missing servers".to_string()))?;
        let endpoint = server["endpoint"]
            .as_str()
            .ok_or_else(|| WsError::Handshake("bullet-public missing endpoint".to_string()))?;

        if let Some(interval) = server["pingInterval"].as_u64() {
            *self.advertised_ping_ms.write() = Some(interval);
            debug!(interval_ms = interval, "Server ping cadence advertised");
        }

        info!("Bullet-public handshake complete");
        Ok(format!("{endpoint}?token={token}&connectId={}", self.next_id()))
    }

    /// One level2 topic per chunk; KuCoin accepts a comma-joined
    /// symbol list in the topic.
    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        if symbols.is_empty() {
            return Vec::new();
        }
        let pairs: Vec<String> = symbols.iter().map(|s| Self::dashed(s)).collect();
        vec![json!({
            "id": self.next_id(),
            "type": "subscribe",
            "topic": format!("/market/level2:{}", pairs.join(",")),
            "response": true,
        })
        .to_string()]
    }

    fn chunk_size(&self) -> usize {
        30
    }

    fn client_ping(&self) -> Option<String> {
        Some(json!({"id": self.next_id(), "type": "ping"}).to_string())
    }

    fn decode(&self, raw: &[u8]) -> FeedResult<Vec<VenueEvent>> {
        let value: Value = serde_json::from_slice(raw)?;

        match value["type"].as_str() {
            Some("welcome") => {
                let interval = *self.advertised_ping_ms.read();
                Ok(match interval {
                    Some(ms) => vec![VenueEvent::AdvertisedPingInterval(ms)],
                    None => vec![VenueEvent::Ignore],
                })
            }
            Some("pong") => Ok(vec![VenueEvent::Pong]),
            Some("ack") => Ok(vec![VenueEvent::Ack {
                topic: value["id"].to_string(),
            }]),
            Some("message") => match value["subject"].as_str() {
                Some("trade.l2update") => {
                    Ok(vec![VenueEvent::Delta(Self::parse_l2_update(&value["data"])?)])
                }
                _ => Ok(vec![VenueEvent::Ignore]),
            },
            _ => Ok(vec![VenueEvent::Ignore]),
        }
    }

    async fn fetch_snapshot(&self, symbol: &str) -> FeedResult<BookSnapshot> {
        let url = format!(
            "{}/api/v1/market/orderbook/level2_100?symbol={}",
            self.config.rest_base,
            Self::dashed(symbol)
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

        let data = &body["data"];
        let sequence = data["sequence"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .or_else(|| data["sequence"].as_u64())
            .ok_or_else(|| FeedError::Snapshot("missing sequence".to_string()))?;

        Ok(BookSnapshot {
            symbol: to_internal(symbol),
            asks: parse_changes(&data["asks"])?,
            bids: parse_changes(&data["bids"])?,
            sequence,
        })
    }
}

/// Parse `[["price","size", ...], ...]` change arrays. A trailing
/// per-change sequence element, when present, is ignored.
fn parse_changes(value: &Value) -> FeedResult<Vec<(Price, Qty)>> {
    let Some(entries) = value.as_array() else {
        return Ok(Vec::new());
    };

    let mut levels = Vec::with_capacity(entries.len());
    for entry in entries {
        let (Some(price), Some(qty)) = (entry[0].as_str(), entry[1].as_str()) else {
            return Err(FeedError::Parse(format!("Malformed change: {entry}")));
        };
        levels.push((
            Price::parse(price).map_err(|e| FeedError::Parse(e.to_string()))?,
            Qty::parse(qty).map_err(|e| FeedError::Parse(e.to_string()))?,
        ));
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stream() -> KucoinStream {
        KucoinStream::new(KucoinConfig::default()).unwrap()
    }

    #[test]
    fn test_decode_l2_update() {
        let raw = br#"{
            "type": "message",
            "topic": "/market/level2:BTC-USDT",
            "subject": "trade.l2update",
            "data": {
                "symbol": "BTC-USDT",
                "sequenceStart": 100,
                "sequenceEnd": 102,
                "changes": {
                    "asks": [["50000.5", "0.1", "100"]],
                    "bids": [["49999.0", "0", "101"]]
                }
            }
        }"#;

        let events = stream().decode(raw).unwrap();
        match &events[0] {
            VenueEvent::Delta(delta) => {
                assert_eq!(delta.symbol, "BTCUSDT");
                assert_eq!(delta.seq_start, 100);
                assert_eq!(delta.seq_end, Some(102));
                assert_eq!(delta.asks[0].0.inner(), dec!(50000.5));
                assert!(delta.bids[0].1.is_zero());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_pong_and_ack() {
        let pong = stream().decode(br#"{"id": "1", "type": "pong"}"#).unwrap();
        assert!(matches!(pong[0], VenueEvent::Pong));

        let ack = stream().decode(br#"{"id": "2", "type": "ack"}"#).unwrap();
        assert!(matches!(ack[0], VenueEvent::Ack { .. }));
    }

    #[test]
    fn test_welcome_surfaces_advertised_interval() {
        let s = stream();
        *s.advertised_ping_ms.write() = Some(18_000);

        let events = s.decode(br#"{"id": "x", "type": "welcome"}"#).unwrap();
        assert!(matches!(
            events[0],
            VenueEvent::AdvertisedPingInterval(18_000)
        ));
    }

    #[test]
    fn test_subscribe_topic_joins_pairs() {
        let frames = stream().subscribe_frames(&["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("/market/level2:BTC-USDT,ETH-USDT"));
    }

    #[test]
    fn test_client_ping_shape() {
        let ping = stream().client_ping().unwrap();
        let value: Value = serde_json::from_str(&ping).unwrap();
        assert_eq!(value["type"], "ping");
        assert!(value["id"].is_u64());
    }
}
