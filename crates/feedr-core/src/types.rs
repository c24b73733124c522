//! Read-side data model shared by all feeders.
//!
//! `BookView` is the immutable, depth-bounded order-book view handed
//! to consumers; `TickerSnapshot` is the per-symbol ticker state.

use crate::{Price, Qty};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single order-book level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub qty: Qty,
}

impl PriceLevel {
    pub fn new(price: Price, qty: Qty) -> Self {
        Self { price, qty }
    }
}

/// Immutable order-book view, bounded to the configured depth.
///
/// Asks are sorted ascending by price, bids descending; no price
/// appears twice on a side. Views are published behind `Arc` and
/// replaced wholesale, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookView {
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
    /// Wall-clock time of the last applied update.
    pub timestamp: DateTime<Utc>,
    /// Venue sequence number of the last applied update, if the venue
    /// provides one.
    pub sequence: Option<u64>,
}

impl BookView {
    pub fn empty() -> Self {
        Self {
            asks: Vec::new(),
            bids: Vec::new(),
            timestamp: Utc::now(),
            sequence: None,
        }
    }

    /// Best ask, if any.
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Best bid, if any.
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Top `depth` levels per side as `(price, qty)` pairs.
    pub fn top(&self, depth: usize) -> (Vec<(Price, Qty)>, Vec<(Price, Qty)>) {
        let take = |levels: &[PriceLevel]| {
            levels
                .iter()
                .take(depth)
                .map(|l| (l.price, l.qty))
                .collect()
        };
        (take(&self.asks), take(&self.bids))
    }
}

/// Per-symbol ticker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    /// Last traded price.
    pub last: Price,
    /// Best bid, if the venue reports one on this channel.
    pub bid: Option<Price>,
    /// Best ask, if the venue reports one on this channel.
    pub ask: Option<Price>,
    /// Time this snapshot was received.
    pub timestamp: DateTime<Utc>,
}

impl TickerSnapshot {
    pub fn new(last: Price, bid: Option<Price>, ask: Option<Price>) -> Self {
        Self {
            last,
            bid,
            ask,
            timestamp: Utc::now(),
        }
    }
}

/// Feeder connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeederState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

impl fmt::Display for FeederState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Reconnecting => write!(f, "RECONNECTING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Diagnostic view of a running feeder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeederHandle {
    /// Venue id (e.g. "binance").
    pub id: String,
    /// Internal symbols this feeder targets.
    pub symbols: Vec<String>,
    /// Current connection state.
    pub state: FeederState,
    /// Time of the last successfully applied update, if any.
    pub last_update: Option<DateTime<Utc>>,
}
