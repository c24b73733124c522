//! Per-feeder symbol stores.
//!
//! `BookStore` holds one `SymbolBook` per internal symbol. There is
//! exactly one writer (the owning feeder's receive loop) and
//! arbitrarily many readers; readers only ever see published
//! `Arc<BookView>`s. `TickerStore` publishes the whole ticker map
//! behind one `Arc` so bulk refreshes are observed atomically.

use crate::book::{BookSnapshot, DeltaOutcome, DepthDelta, SymbolBook};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use feedr_core::symbol::to_internal;
use feedr_core::{BookView, Price, Qty, TickerSnapshot};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Default depth bound for retained and published levels.
pub const DEFAULT_MAX_DEPTH: usize = 200;

type BookEntry = Arc<RwLock<SymbolBook>>;

/// Order-book cache for one feeder.
pub struct BookStore {
    books: DashMap<String, BookEntry>,
    max_depth: usize,
    last_update: RwLock<Option<DateTime<Utc>>>,
}

impl BookStore {
    pub fn new(max_depth: usize) -> Self {
        Self {
            books: DashMap::new(),
            max_depth,
            last_update: RwLock::new(None),
        }
    }

    fn get_or_create(&self, symbol: &str) -> BookEntry {
        self.books
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(SymbolBook::new(self.max_depth))))
            .clone()
    }

    fn touch(&self) {
        *self.last_update.write() = Some(Utc::now());
    }

    /// Apply a sequenced delta. Lazily creates the book, which then
    /// reports `Unsynced` until a snapshot is installed.
    pub fn apply_delta(&self, delta: &DepthDelta) -> DeltaOutcome {
        let entry = self.get_or_create(&delta.symbol);
        let outcome = entry.write().apply_delta(delta);
        if outcome == DeltaOutcome::Applied {
            self.touch();
        }
        outcome
    }

    /// Install a REST snapshot for a symbol.
    pub fn install_snapshot(&self, snapshot: &BookSnapshot) {
        let entry = self.get_or_create(&snapshot.symbol);
        entry.write().install_snapshot(snapshot);
        self.touch();
    }

    /// Full top-of-book replacement for venues without sequences.
    pub fn replace(
        &self,
        symbol: &str,
        asks: &[(Price, Qty)],
        bids: &[(Price, Qty)],
        sequence: Option<u64>,
    ) {
        let entry = self.get_or_create(symbol);
        entry.write().replace(asks, bids, sequence);
        self.touch();
    }

    /// Whether a symbol is missing its snapshot or has a pending gap.
    pub fn needs_resync(&self, symbol: &str) -> bool {
        self.books
            .get(symbol)
            .map(|entry| entry.read().needs_resync())
            .unwrap_or(true)
    }

    /// Published view for a symbol, if one exists.
    pub fn view(&self, symbol: &str) -> Option<Arc<BookView>> {
        let key = to_internal(symbol);
        self.books.get(&key).map(|entry| entry.read().view())
    }

    /// Top `depth` levels as `(price, qty)` pairs.
    ///
    /// Accepts internal and `BASE/QUOTE` forms. Unknown symbols
    /// degrade to empty sides; "no data yet" and "error" are
    /// indistinguishable here by design.
    pub fn order_book(&self, symbol: &str, depth: usize) -> (Vec<(Price, Qty)>, Vec<(Price, Qty)>) {
        match self.view(symbol) {
            Some(view) => view.top(depth),
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Time of the last applied update across all symbols.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.read()
    }

    /// Symbols with at least one book entry.
    pub fn symbols(&self) -> Vec<String> {
        self.books.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for BookStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

type TickerMap = HashMap<String, TickerSnapshot>;

/// Ticker cache publishing the whole map behind one `Arc`.
///
/// `replace_all` swaps the map in a single assignment, so readers
/// never observe a partially refreshed map.
pub struct TickerStore {
    map: RwLock<Arc<TickerMap>>,
}

impl TickerStore {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Current map. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<TickerMap> {
        Arc::clone(&self.map.read())
    }

    /// Atomically replace the entire map (bulk polling path).
    pub fn replace_all(&self, tickers: TickerMap) {
        *self.map.write() = Arc::new(tickers);
    }

    /// Upsert one symbol (streaming path). Copy-on-write: the new map
    /// is built aside and swapped in whole.
    pub fn upsert(&self, symbol: &str, ticker: TickerSnapshot) {
        let mut next: TickerMap = (*self.snapshot()).clone();
        next.insert(to_internal(symbol), ticker);
        *self.map.write() = Arc::new(next);
    }

    pub fn get(&self, symbol: &str) -> Option<TickerSnapshot> {
        self.snapshot().get(&to_internal(symbol)).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl Default for TickerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pq(p: &str, q: &str) -> (Price, Qty) {
        (Price::parse(p).unwrap(), Qty::parse(q).unwrap())
    }

    #[test]
    fn test_unknown_symbol_degrades_to_empty() {
        let store = BookStore::default();
        let (asks, bids) = store.order_book("BTC/USDT", 5);
        assert!(asks.is_empty());
        assert!(bids.is_empty());
    }

    #[test]
    fn test_full_replace_scenario() {
        // Full-replace feeder receives asks [[100.5, 2], [100.7, 1]],
        // bids [[100.4, 3]] for BTCUSDT; the external form reads back
        // the same levels.
        let store = BookStore::default();
        store.replace(
            "BTCUSDT",
            &[pq("100.5", "2"), pq("100.7", "1")],
            &[pq("100.4", "3")],
            None,
        );

        let (asks, bids) = store.order_book("BTC/USDT", 5);
        assert_eq!(
            asks,
            vec![pq("100.5", "2"), pq("100.7", "1")]
        );
        assert_eq!(bids, vec![pq("100.4", "3")]);
    }

    #[test]
    fn test_seq_aware_zero_qty_scenario() {
        // Snapshot seq=10 with one ask (100, 5); delta 11..11 zeroes
        // it; the book ends with no asks.
        let store = BookStore::default();
        store.install_snapshot(&BookSnapshot {
            symbol: "ETHUSDT".to_string(),
            asks: vec![pq("100", "5")],
            bids: Vec::new(),
            sequence: 10,
        });

        let outcome = store.apply_delta(&DepthDelta {
            symbol: "ETHUSDT".to_string(),
            seq_start: 11,
            seq_end: Some(11),
            asks: vec![pq("100", "0")],
            bids: Vec::new(),
        });
        assert_eq!(outcome, DeltaOutcome::Applied);

        let (asks, _) = store.order_book("ETHUSDT", 5);
        assert!(asks.is_empty());
    }

    #[test]
    fn test_needs_resync_lifecycle() {
        let store = BookStore::default();
        assert!(store.needs_resync("BTCUSDT"));

        store.install_snapshot(&BookSnapshot {
            symbol: "BTCUSDT".to_string(),
            asks: vec![pq("100", "1")],
            bids: Vec::new(),
            sequence: 5,
        });
        assert!(!store.needs_resync("BTCUSDT"));

        // Gap flags the symbol for resync without touching others.
        store.apply_delta(&DepthDelta {
            symbol: "BTCUSDT".to_string(),
            seq_start: 10,
            seq_end: Some(10),
            asks: Vec::new(),
            bids: Vec::new(),
        });
        assert!(store.needs_resync("BTCUSDT"));
    }

    #[test]
    fn test_ticker_store_atomic_swap() {
        let store = TickerStore::new();
        let before = store.snapshot();

        let mut bulk = HashMap::new();
        bulk.insert(
            "BTCUSDT".to_string(),
            TickerSnapshot::new(Price::new(dec!(50000)), None, None),
        );
        bulk.insert(
            "ETHUSDT".to_string(),
            TickerSnapshot::new(Price::new(dec!(3000)), None, None),
        );
        store.replace_all(bulk);

        // The old Arc still reads as the old (empty) map; the new one
        // is complete. No intermediate state is observable.
        assert!(before.is_empty());
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get("BTC/USDT").unwrap().last.inner(),
            dec!(50000)
        );
    }

    #[test]
    fn test_ticker_upsert() {
        let store = TickerStore::new();
        store.upsert(
            "btc-usdt",
            TickerSnapshot::new(Price::new(dec!(1)), None, None),
        );
        assert!(store.get("BTCUSDT").is_some());
    }
}
