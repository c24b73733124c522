//! The feeder read contract.
//!
//! Every other subsystem consumes feeders exclusively through this
//! trait. Read methods never fail for known failure modes: they
//! degrade to empty or stale data.

use async_trait::async_trait;
use feedr_core::{FeederHandle, Price, Qty, TickerSnapshot};
use std::collections::HashMap;
use std::time::Duration;

/// Top-of-book levels per side as `(price, qty)` pairs: `(asks, bids)`.
pub type OrderBookLevels = (Vec<(Price, Qty)>, Vec<(Price, Qty)>);

/// A long-lived market-data feeder for one venue.
#[async_trait]
pub trait Feeder: Send + Sync {
    /// Venue id (lowercase).
    fn id(&self) -> &str;

    /// Spawn the feed loop. Idempotent: a second call is a no-op.
    async fn start(&self);

    /// Signal the loop to exit and join it within `timeout`,
    /// best-effort.
    async fn stop(&self, timeout: Duration);

    /// Top `depth` levels for a symbol (internal or `BASE/QUOTE`
    /// form). Unknown symbols return empty sides.
    fn order_book(&self, symbol: &str, depth: usize) -> OrderBookLevels;

    /// All known tickers, keyed by external `BASE/QUOTE` form.
    fn tickers(&self) -> HashMap<String, TickerSnapshot>;

    /// Diagnostic view.
    fn status(&self) -> FeederHandle;
}

impl std::fmt::Debug for dyn Feeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feeder").field("id", &self.id()).finish()
    }
}
