//! Huobi spot protocol.
//!
//! Every frame arrives gzip-compressed, so decoding goes through the
//! ordered frame pipeline. `market.{sym}.depth.step0` publishes a
//! full merged-depth snapshot per message and maps to a book
//! replacement; `market.{sym}.detail` drives tickers. The server
//! pings with `{"ping": n}` and expects `{"pong": n}` back
//! immediately.

use feedr_book::{decode_frame, BookSnapshot, FeedError, FeedResult};
use feedr_core::symbol::to_internal;
use feedr_core::{Price, Qty, TickerSnapshot};
use feedr_ws::{VenueEvent, VenueStream, WsResult};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

const DEFAULT_WS_URL: &str = "wss://api.huobi.pro/ws";

#[derive(Debug, Clone)]
pub struct HuobiConfig {
    pub ws_url: String,
}

impl Default for HuobiConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
        }
    }
}

pub struct HuobiStream {
    config: HuobiConfig,
    request_id: AtomicU64,
}

impl HuobiStream {
    pub fn new(config: HuobiConfig) -> Self {
        Self {
            config,
            request_id: AtomicU64::new(1),
        }
    }

    /// `market.btcusdt.depth.step0` -> `BTCUSDT`.
    fn symbol_of(channel: &str) -> FeedResult<String> {
        channel
            .split('.')
            .nth(1)
            .filter(|s| !s.is_empty())
            .map(to_internal)
            .ok_or_else(|| FeedError::Parse(format!("Unrecognized channel: {channel}")))
    }

    fn parse_depth(channel: &str, tick: &Value) -> FeedResult<VenueEvent> {
        Ok(VenueEvent::Replace {
            symbol: Self::symbol_of(channel)?,
            asks: parse_float_levels(&tick["asks"])?,
            bids: parse_float_levels(&tick["bids"])?,
            sequence: tick["version"].as_u64(),
        })
    }

    fn parse_detail(channel: &str, tick: &Value) -> FeedResult<VenueEvent> {
        let last = parse_decimal(&tick["close"])
            .ok_or_else(|| FeedError::Parse("detail missing close".to_string()))?;
        Ok(VenueEvent::Ticker {
            symbol: Self::symbol_of(channel)?,
            ticker: TickerSnapshot::new(Price::new(last), None, None),
        })
    }
}

#[async_trait]
impl VenueStream for HuobiStream {
    fn name(&self) -> &'static str {
        "huobi"
    }

    async fn endpoint(&self, _symbols: &[String]) -> WsResult<String> {
        Ok(self.config.ws_url.clone())
    }

    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        let mut frames = Vec::with_capacity(symbols.len() * 2);
        for symbol in symbols {
            let lower = symbol.to_lowercase();
            for channel in [
                format!("market.{lower}.depth.step0"),
                format!("market.{lower}.detail"),
            ] {
                frames.push(
                    json!({
                        "sub": channel,
                        "id": self.request_id.fetch_add(1, Ordering::Relaxed).to_string(),
                    })
                    .to_string(),
                );
            }
        }
        frames
    }

    fn decode(&self, raw: &[u8]) -> FeedResult<Vec<VenueEvent>> {
        let value = decode_frame(raw)?;

        if let Some(n) = value["ping"].as_u64() {
            return Ok(vec![VenueEvent::PingRequest(
                json!({"pong": n}).to_string(),
            )]);
        }

        if let Some(topic) = value["subbed"].as_str() {
            return Ok(vec![VenueEvent::Ack {
                topic: topic.to_string(),
            }]);
        }

        let (Some(channel), tick) = (value["ch"].as_str(), &value["tick"]) else {
            return Ok(vec![VenueEvent::Ignore]);
        };
        if tick.is_null() {
            return Ok(vec![VenueEvent::Ignore]);
        }

        if channel.contains(".depth.") {
            Ok(vec![Self::parse_depth(channel, tick)?])
        } else if channel.ends_with(".detail") {
            Ok(vec![Self::parse_detail(channel, tick)?])
        } else {
            Ok(vec![VenueEvent::Ignore])
        }
    }

    /// Depth arrives as full snapshots on the stream itself; there is
    /// no sequenced delta path to resync.
    async fn fetch_snapshot(&self, symbol: &str) -> FeedResult<BookSnapshot> {
        Err(FeedError::Snapshot(format!(
            "{symbol}: depth channel publishes full snapshots, REST resync not applicable"
        )))
    }
}

fn parse_decimal(value: &Value) -> Option<Decimal> {
    serde_json::from_value(value.clone()).ok()
}

/// Parse `[[price, qty], ...]` arrays of JSON numbers.
fn parse_float_levels(value: &Value) -> FeedResult<Vec<(Price, Qty)>> {
    let Some(entries) = value.as_array() else {
        return Ok(Vec::new());
    };

    let mut levels = Vec::with_capacity(entries.len());
    for entry in entries {
        let (Some(price), Some(qty)) = (parse_decimal(&entry[0]), parse_decimal(&entry[1]))
        else {
            return Err(FeedError::Parse(format!("Malformed level: {entry}")));
        };
        levels.push((Price::new(price), Qty::new(qty)));
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn stream() -> HuobiStream {
        HuobiStream::new(HuobiConfig::default())
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_gzipped_ping_needs_shaped_pong() {
        let raw = gzip(br#"{"ping": 1754123456789}"#);
        let events = stream().decode(&raw).unwrap();
        match &events[0] {
            VenueEvent::PingRequest(reply) => {
                assert_eq!(reply, r#"{"pong":1754123456789}"#);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_depth_step0_is_full_replace() {
        let raw = gzip(
            br#"{
                "ch": "market.btcusdt.depth.step0",
                "tick": {
                    "version": 123,
                    "asks": [[50000.5, 0.2], [50001.0, 1.0]],
                    "bids": [[49999.9, 0.5]]
                }
            }"#,
        );

        let events = stream().decode(&raw).unwrap();
        match &events[0] {
            VenueEvent::Replace {
                symbol,
                asks,
                bids,
                sequence,
            } => {
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(asks.len(), 2);
                assert_eq!(asks[0].0.inner(), dec!(50000.5));
                assert_eq!(bids[0].1.inner(), dec!(0.5));
                assert_eq!(*sequence, Some(123));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_detail_drives_ticker() {
        let raw = gzip(br#"{"ch": "market.ethusdt.detail", "tick": {"close": 3000.25}}"#);
        let events = stream().decode(&raw).unwrap();
        match &events[0] {
            VenueEvent::Ticker { symbol, ticker } => {
                assert_eq!(symbol, "ETHUSDT");
                assert_eq!(ticker.last.inner(), dec!(3000.25));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_garbage_frame_is_undecodable() {
        let err = stream().decode(&[0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert!(matches!(err, FeedError::UndecodableFrame { .. }));
    }

    #[test]
    fn test_subscribe_frames_cover_both_channels() {
        let frames = stream().subscribe_frames(&["BTCUSDT".to_string()]);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("market.btcusdt.depth.step0"));
        assert!(frames[1].contains("market.btcusdt.detail"));
    }
}
