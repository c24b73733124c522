//! Subscription tracking with bounded resubscribe retries.
//!
//! After subscribing, each symbol is expected to produce a first
//! update within a deadline. A periodic scan resubscribes symbols
//! that stayed silent, up to `max_retries`; beyond that the symbol is
//! marked exhausted and excluded from further automatic retries until
//! the next reconnect resets the tracker.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Per-symbol subscription state.
#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
    /// When the subscription (or last resubscribe) was sent.
    pub last_subscribed_at: DateTime<Utc>,
    /// Resubscribe attempts so far.
    pub retry_count: u32,
    /// Gave up after `max_retries`; excluded from the periodic scan.
    pub exhausted: bool,
    /// First update received, if any.
    pub first_update_at: Option<DateTime<Utc>>,
}

impl SubscriptionEntry {
    fn new() -> Self {
        Self {
            last_subscribed_at: Utc::now(),
            retry_count: 0,
            exhausted: false,
            first_update_at: None,
        }
    }
}

/// Tracks subscription liveness per internal symbol.
pub struct SubscriptionTracker {
    entries: RwLock<HashMap<String, SubscriptionEntry>>,
    /// Cumulative resubscribes across all connections of this feeder.
    retries_total: AtomicU64,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retries_total: AtomicU64::new(0),
        }
    }

    /// Seed entries after sending the initial subscribe requests.
    /// Existing entries are replaced (fresh deadline, zero retries).
    pub fn seed(&self, symbols: &[String]) {
        let mut entries = self.entries.write();
        for symbol in symbols {
            entries.insert(symbol.clone(), SubscriptionEntry::new());
        }
    }

    /// Record a data update for a symbol.
    pub fn record_update(&self, symbol: &str) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(symbol) {
            if entry.first_update_at.is_none() {
                entry.first_update_at = Some(Utc::now());
                debug!(symbol, "First update received");
            }
        }
    }

    /// Scan for symbols needing a resubscribe.
    ///
    /// Symbols with no first update within `retry_timeout` are
    /// returned for resubscription (their retry count incremented and
    /// deadline restarted); symbols that already used up
    /// `max_retries` are marked exhausted instead, logged once, and
    /// never returned again.
    pub fn due_for_retry(&self, retry_timeout: Duration, max_retries: u32) -> Vec<String> {
        let now = Utc::now();
        let timeout_ms = retry_timeout.as_millis() as i64;
        let mut due = Vec::new();

        let mut entries = self.entries.write();
        for (symbol, entry) in entries.iter_mut() {
            if entry.exhausted || entry.first_update_at.is_some() {
                continue;
            }
            let silent_ms = (now - entry.last_subscribed_at).num_milliseconds();
            if silent_ms < timeout_ms {
                continue;
            }
            if entry.retry_count >= max_retries {
                entry.exhausted = true;
                warn!(
                    symbol = %symbol,
                    retries = entry.retry_count,
                    "Subscription exhausted, excluding from automatic retry"
                );
                continue;
            }
            entry.retry_count += 1;
            entry.last_subscribed_at = now;
            due.push(symbol.clone());
        }

        self.retries_total
            .fetch_add(due.len() as u64, Ordering::Relaxed);
        due
    }

    /// Total resubscribes ever issued (not cleared by [`reset`]).
    ///
    /// [`reset`]: SubscriptionTracker::reset
    pub fn retries_total(&self) -> u64 {
        self.retries_total.load(Ordering::Relaxed)
    }

    /// Symbols currently marked exhausted.
    pub fn exhausted(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.exhausted)
            .map(|(s, _)| s.clone())
            .collect()
    }

    /// State for one symbol.
    pub fn entry(&self, symbol: &str) -> Option<SubscriptionEntry> {
        self.entries.read().get(symbol).cloned()
    }

    /// Clear everything, including exhaustion (called on reconnect).
    pub fn reset(&self) {
        self.entries.write().clear();
    }
}

impl Default for SubscriptionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(symbols: &[&str]) -> SubscriptionTracker {
        let tracker = SubscriptionTracker::new();
        tracker.seed(&symbols.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        tracker
    }

    #[test]
    fn test_update_clears_retry_eligibility() {
        let tracker = seeded(&["BTCUSDT", "ETHUSDT"]);
        tracker.record_update("BTCUSDT");

        // Zero timeout: everything silent is immediately due.
        let due = tracker.due_for_retry(Duration::ZERO, 3);
        assert_eq!(due, vec!["ETHUSDT".to_string()]);
    }

    #[test]
    fn test_not_due_before_timeout() {
        let tracker = seeded(&["BTCUSDT"]);
        let due = tracker.due_for_retry(Duration::from_secs(60), 3);
        assert!(due.is_empty());
    }

    #[test]
    fn test_exhaustion_after_max_retries() {
        let tracker = seeded(&["BTCUSDT"]);

        for _ in 0..3 {
            let due = tracker.due_for_retry(Duration::ZERO, 3);
            assert_eq!(due.len(), 1);
        }

        // Fourth scan: retries used up, symbol becomes exhausted.
        let due = tracker.due_for_retry(Duration::ZERO, 3);
        assert!(due.is_empty());
        assert_eq!(tracker.exhausted(), vec!["BTCUSDT".to_string()]);

        // And stays excluded afterwards.
        assert!(tracker.due_for_retry(Duration::ZERO, 3).is_empty());
    }

    #[test]
    fn test_reset_clears_exhaustion() {
        let tracker = seeded(&["BTCUSDT"]);
        for _ in 0..4 {
            tracker.due_for_retry(Duration::ZERO, 0);
        }
        assert!(!tracker.exhausted().is_empty());

        tracker.reset();
        assert!(tracker.exhausted().is_empty());
        assert!(tracker.entry("BTCUSDT").is_none());
    }

    #[test]
    fn test_update_for_unknown_symbol_is_noop() {
        let tracker = seeded(&["BTCUSDT"]);
        tracker.record_update("DOGEUSDT");
        assert!(tracker.entry("DOGEUSDT").is_none());
    }
}
