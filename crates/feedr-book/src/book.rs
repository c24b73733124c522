//! Sequence-aware order-book engine.
//!
//! A `SequencedBook` holds the raw per-side price maps plus the last
//! applied sequence number. Deltas are validated against the local
//! sequence before mutation: a gap forces the caller to resnapshot,
//! a stale delta is dropped. After every applied mutation the owning
//! `SymbolBook` rebuilds its externally visible top-N `BookView` and
//! publishes it via a single `Arc` swap so readers never observe a
//! half-built book.

use chrono::{DateTime, Utc};
use feedr_core::{BookView, Price, PriceLevel, Qty};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// One side of the raw order book: price -> quantity.
///
/// A quantity of zero means "absent" and removes the level.
#[derive(Debug, Clone, Default)]
pub struct BookSide {
    levels: BTreeMap<Price, Qty>,
}

impl BookSide {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one `(price, qty)` change. Zero removes, else upsert.
    /// Duplicate prices within one delta are last-write-wins by
    /// construction (later inserts overwrite).
    pub fn apply(&mut self, price: Price, qty: Qty) {
        if qty.is_zero() {
            self.levels.remove(&price);
        } else {
            self.levels.insert(price, qty);
        }
    }

    /// Replace all levels wholesale.
    pub fn replace(&mut self, levels: impl IntoIterator<Item = (Price, Qty)>) {
        self.levels.clear();
        for (price, qty) in levels {
            self.apply(price, qty);
        }
    }

    /// Top `depth` levels, ascending by price (ask ordering).
    pub fn top_ascending(&self, depth: usize) -> Vec<PriceLevel> {
        self.levels
            .iter()
            .take(depth)
            .map(|(p, q)| PriceLevel::new(*p, *q))
            .collect()
    }

    /// Top `depth` levels, descending by price (bid ordering).
    pub fn top_descending(&self, depth: usize) -> Vec<PriceLevel> {
        self.levels
            .iter()
            .rev()
            .take(depth)
            .map(|(p, q)| PriceLevel::new(*p, *q))
            .collect()
    }

    /// Drop levels beyond `depth`, keeping the best ones.
    ///
    /// `best_is_lowest` is true for asks (keep lowest prices) and
    /// false for bids (keep highest).
    pub fn truncate(&mut self, depth: usize, best_is_lowest: bool) {
        while self.levels.len() > depth {
            let worst = if best_is_lowest {
                self.levels.keys().next_back().copied()
            } else {
                self.levels.keys().next().copied()
            };
            match worst {
                Some(price) => {
                    self.levels.remove(&price);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// A delta message from a sequence-carrying venue stream.
#[derive(Debug, Clone)]
pub struct DepthDelta {
    /// Internal symbol key (`BTCUSDT`).
    pub symbol: String,
    /// First sequence number covered by this delta.
    pub seq_start: u64,
    /// Last sequence number covered, if the venue reports a range.
    pub seq_end: Option<u64>,
    /// Ask-side changes, in message order.
    pub asks: Vec<(Price, Qty)>,
    /// Bid-side changes, in message order.
    pub bids: Vec<(Price, Qty)>,
}

/// A full REST order-book snapshot with its base sequence number.
#[derive(Debug, Clone)]
pub struct BookSnapshot {
    pub symbol: String,
    pub asks: Vec<(Price, Qty)>,
    pub bids: Vec<(Price, Qty)>,
    pub sequence: u64,
}

/// Outcome of applying a delta against the local sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Delta applied; sequence advanced.
    Applied,
    /// Delta covered sequence numbers already applied; dropped.
    Stale,
    /// Delta skipped sequence numbers; state untouched, caller must
    /// fetch a fresh snapshot. Carries the sequence the book expected
    /// next and the one the delta started at.
    Gap { expected: u64, got: u64 },
    /// Book has no snapshot yet; caller must fetch one first.
    Unsynced,
}

/// Raw price maps plus the last applied sequence number.
#[derive(Debug, Clone, Default)]
pub struct SequencedBook {
    pub asks: BookSide,
    pub bids: BookSide,
    /// Last applied sequence; `None` until a snapshot is installed.
    pub seq: Option<u64>,
}

impl SequencedBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize from a snapshot, discarding any previous state.
    pub fn install_snapshot(&mut self, snapshot: &BookSnapshot) {
        self.asks.replace(snapshot.asks.iter().copied());
        self.bids.replace(snapshot.bids.iter().copied());
        self.seq = Some(snapshot.sequence);
    }

    /// Validate and apply one delta.
    ///
    /// An empty delta still advances the sequence; the price maps are
    /// untouched.
    pub fn apply_delta(&mut self, delta: &DepthDelta) -> DeltaOutcome {
        let Some(local_seq) = self.seq else {
            return DeltaOutcome::Unsynced;
        };

        if delta.seq_start > local_seq + 1 {
            return DeltaOutcome::Gap {
                expected: local_seq + 1,
                got: delta.seq_start,
            };
        }
        if delta.seq_start <= local_seq {
            return DeltaOutcome::Stale;
        }
        let seq_end = delta.seq_end.unwrap_or(delta.seq_start);

        for &(price, qty) in &delta.asks {
            self.asks.apply(price, qty);
        }
        for &(price, qty) in &delta.bids {
            self.bids.apply(price, qty);
        }
        self.seq = Some(seq_end.max(local_seq + 1));
        DeltaOutcome::Applied
    }
}

/// Per-symbol book state: the raw sequenced book plus the published
/// top-N view.
#[derive(Debug)]
pub struct SymbolBook {
    book: SequencedBook,
    /// Published view; replaced wholesale, never mutated.
    view: Arc<BookView>,
    /// Depth bound for both the view and the retained raw maps.
    max_depth: usize,
    /// Set when a gap was detected and the resnapshot has not yet
    /// succeeded. Checked lazily on the next delta.
    needs_resync: bool,
    last_update: Option<DateTime<Utc>>,
}

impl SymbolBook {
    pub fn new(max_depth: usize) -> Self {
        Self {
            book: SequencedBook::new(),
            view: Arc::new(BookView::empty()),
            max_depth,
            needs_resync: false,
            last_update: None,
        }
    }

    /// Published top-N view. Cheap: clones an `Arc`.
    pub fn view(&self) -> Arc<BookView> {
        Arc::clone(&self.view)
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync || self.book.seq.is_none()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Install a fresh snapshot and publish the rebuilt view.
    pub fn install_snapshot(&mut self, snapshot: &BookSnapshot) {
        self.book.install_snapshot(snapshot);
        self.needs_resync = false;
        self.publish();
    }

    /// Apply a delta per the sequence rules. On a gap the previous
    /// view stays visible (stale but consistent) until a snapshot
    /// lands.
    pub fn apply_delta(&mut self, delta: &DepthDelta) -> DeltaOutcome {
        let outcome = self.book.apply_delta(delta);
        match outcome {
            DeltaOutcome::Applied => {
                self.book.asks.truncate(self.max_depth, true);
                self.book.bids.truncate(self.max_depth, false);
                self.publish();
            }
            DeltaOutcome::Gap { .. } => {
                debug!(
                    symbol = %delta.symbol,
                    local_seq = ?self.book.seq,
                    seq_start = delta.seq_start,
                    "Sequence gap, book needs resync"
                );
                self.needs_resync = true;
            }
            DeltaOutcome::Stale | DeltaOutcome::Unsynced => {}
        }
        outcome
    }

    /// Full top-of-book replacement (no sequence tracking).
    pub fn replace(&mut self, asks: &[(Price, Qty)], bids: &[(Price, Qty)], sequence: Option<u64>) {
        self.book.asks.replace(asks.iter().copied());
        self.book.bids.replace(bids.iter().copied());
        self.book.asks.truncate(self.max_depth, true);
        self.book.bids.truncate(self.max_depth, false);
        self.book.seq = sequence.or(self.book.seq).or(Some(0));
        self.needs_resync = false;
        self.publish();
    }

    fn publish(&mut self) {
        let now = Utc::now();
        self.view = Arc::new(BookView {
            asks: self.book.asks.top_ascending(self.max_depth),
            bids: self.book.bids.top_descending(self.max_depth),
            timestamp: now,
            sequence: self.book.seq,
        });
        self.last_update = Some(now);
    }
}
