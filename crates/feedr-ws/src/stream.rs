//! The per-venue protocol seam.
//!
//! `ConnectionManager` is data-driven: everything venue-specific
//! (endpoint resolution, subscribe frame shapes, message decoding,
//! keepalive shapes, snapshot fetching) lives behind the
//! `VenueStream` trait, one implementation per exchange.

use crate::error::WsResult;
use async_trait::async_trait;
use feedr_book::{BookSnapshot, DepthDelta, FeedResult};
use feedr_core::{Price, Qty, TickerSnapshot};
use std::time::Duration;

/// A decoded event from a venue stream.
#[derive(Debug, Clone)]
pub enum VenueEvent {
    /// Sequenced order-book delta.
    Delta(DepthDelta),
    /// Full replacement of a symbol's cached levels.
    Replace {
        symbol: String,
        asks: Vec<(Price, Qty)>,
        bids: Vec<(Price, Qty)>,
        sequence: Option<u64>,
    },
    /// Ticker update.
    Ticker {
        symbol: String,
        ticker: TickerSnapshot,
    },
    /// Server-initiated ping; the payload is the venue-shaped reply
    /// that must be sent back immediately.
    PingRequest(String),
    /// Application-level pong.
    Pong,
    /// Venue advertised its expected ping cadence (ms).
    AdvertisedPingInterval(u64),
    /// Subscription acknowledgement.
    Ack { topic: String },
    /// Frame failed every decode stage and was dropped; carries a
    /// bounded raw sample. Emitted by the transport, not by venues.
    Dropped { sample: String },
    /// Valid but uninteresting message.
    Ignore,
}

/// Protocol surface implemented once per venue.
#[async_trait]
pub trait VenueStream: Send + Sync + 'static {
    /// Venue id (lowercase, e.g. "binance").
    fn name(&self) -> &'static str;

    /// Resolve the WebSocket endpoint. May perform a REST handshake
    /// (temporary token/endpoint acquisition) and must use short
    /// timeouts.
    async fn endpoint(&self, symbols: &[String]) -> WsResult<String>;

    /// Build the subscribe frames for one chunk of internal symbols.
    /// May be empty when the endpoint URL already carries the topics.
    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String>;

    /// Per-connection topic limit for chunked subscription.
    fn chunk_size(&self) -> usize {
        30
    }

    /// Pause between subscribe chunks, to respect venue rate limits.
    fn chunk_pause(&self) -> Duration {
        Duration::ZERO
    }

    /// Client-initiated keepalive frame. `None` means a plain
    /// WebSocket ping frame is used instead.
    fn client_ping(&self) -> Option<String> {
        None
    }

    /// Decode one raw frame (text or binary) into events.
    fn decode(&self, raw: &[u8]) -> FeedResult<Vec<VenueEvent>>;

    /// Fetch a REST order-book snapshot for resync. Only meaningful
    /// for sequence-carrying venues.
    async fn fetch_snapshot(&self, symbol: &str) -> FeedResult<BookSnapshot>;
}
