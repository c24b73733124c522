//! REST polling fallback for venues without a streaming client.
//!
//! `PollingFeeder` drives a `TickerSource` on a fixed interval,
//! preferring one bulk fetch and falling back to per-symbol calls.
//! The exposed ticker map is swapped atomically as a whole, so
//! readers never observe a partial refresh. Consecutive failures back
//! off linearly and identical errors are logged at most once per 30 s.

use crate::feeder::{Feeder, OrderBookLevels};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedr_book::{FeedError, FeedResult, TickerStore};
use feedr_core::symbol::{to_external, to_internal};
use feedr_core::{FeederHandle, FeederState, Price, TickerSnapshot};
use feedr_telemetry::metrics;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Extra polls of delay accumulated per consecutive failure, capped.
const MAX_BACKOFF_STEPS: u32 = 5;

/// Identical consecutive errors are logged at most this often.
const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Suppresses repeats of the same error message within a window.
///
/// A message is a repeat while it matches the last logged message and
/// the window has not elapsed since that log. Logging a message (first
/// occurrence, different message, or window expiry) restarts the
/// window.
struct ErrorThrottle {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl ErrorThrottle {
    fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Whether `message` should be logged at full severity now.
    fn should_log(&mut self, message: &str) -> bool {
        let repeat = self
            .last
            .as_ref()
            .is_some_and(|(prev, at)| prev == message && at.elapsed() < self.window);
        if !repeat {
            self.last = Some((message.to_string(), Instant::now()));
        }
        !repeat
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

/// A pollable REST ticker endpoint.
#[async_trait]
pub trait TickerSource: Send + Sync + 'static {
    /// Venue id (lowercase).
    fn name(&self) -> &'static str;

    /// Bulk fetch of all tickers, keyed by internal symbol. An empty
    /// map signals "bulk unsupported" and triggers per-symbol calls.
    async fn fetch_all(&self) -> FeedResult<HashMap<String, TickerSnapshot>>;

    /// Fetch one symbol.
    async fn fetch_one(&self, symbol: &str) -> FeedResult<TickerSnapshot>;
}

/// Ticker-only feeder polling a `TickerSource`.
pub struct PollingFeeder<S: TickerSource> {
    source: Arc<S>,
    /// Internal symbols; empty means "expose whatever bulk returns".
    symbols: Vec<String>,
    interval: Duration,
    tickers: Arc<TickerStore>,
    state: Arc<RwLock<FeederState>>,
    last_update: Arc<RwLock<Option<DateTime<Utc>>>>,
    shutdown: CancellationToken,
    started: AtomicBool,
    tasks: TokioMutex<Vec<JoinHandle<()>>>,
}

impl<S: TickerSource> PollingFeeder<S> {
    pub fn new(source: S, symbols: Vec<String>, interval: Duration) -> Self {
        Self {
            source: Arc::new(source),
            symbols: symbols.iter().map(|s| to_internal(s)).collect(),
            interval,
            tickers: Arc::new(TickerStore::new()),
            state: Arc::new(RwLock::new(FeederState::Disconnected)),
            last_update: Arc::new(RwLock::new(None)),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: TokioMutex::new(Vec::new()),
        }
    }

    async fn poll_loop(
        source: Arc<S>,
        symbols: Vec<String>,
        interval: Duration,
        tickers: Arc<TickerStore>,
        state: Arc<RwLock<FeederState>>,
        last_update: Arc<RwLock<Option<DateTime<Utc>>>>,
        shutdown: CancellationToken,
    ) {
        let venue = source.name();
        let mut failures: u32 = 0;
        let mut throttle = ErrorThrottle::new(ERROR_LOG_INTERVAL);

        loop {
            match Self::poll_once(&source, &symbols).await {
                Ok(map) => {
                    let count = map.len();
                    tickers.replace_all(map);
                    *state.write() = FeederState::Connected;
                    *last_update.write() = Some(Utc::now());
                    failures = 0;
                    throttle.reset();
                    debug!(venue, tickers = count, "Poll complete");
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    metrics::POLL_FAILURES_TOTAL.with_label_values(&[venue]).inc();

                    let message = e.to_string();
                    if throttle.should_log(&message) {
                        warn!(venue, failures, error = %message, "Poll failed");
                    } else {
                        debug!(venue, failures, error = %message, "Poll failed (repeat)");
                    }
                }
            }

            // Linear backoff: one extra interval per consecutive
            // failure, capped.
            let steps = 1 + failures.min(MAX_BACKOFF_STEPS);
            let delay = interval * steps;
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown.cancelled() => break,
            }
        }

        *state.write() = FeederState::Stopped;
        debug!(venue, "Poll loop exited");
    }

    async fn poll_once(
        source: &Arc<S>,
        symbols: &[String],
    ) -> FeedResult<HashMap<String, TickerSnapshot>> {
        let mut map = source.fetch_all().await?;

        if !symbols.is_empty() {
            if !map.is_empty() {
                map.retain(|symbol, _| symbols.contains(symbol));
            } else {
                // Bulk unsupported for this source; fall back to
                // per-symbol calls, partial results allowed.
                for symbol in symbols {
                    match source.fetch_one(symbol).await {
                        Ok(ticker) => {
                            map.insert(symbol.clone(), ticker);
                        }
                        Err(e) => {
                            debug!(symbol = %symbol, error = %e, "Per-symbol fetch failed");
                        }
                    }
                }
                if map.is_empty() {
                    return Err(FeedError::InvalidData(
                        "No tickers from bulk or per-symbol fetch".to_string(),
                    ));
                }
            }
        }

        Ok(map)
    }
}

#[async_trait]
impl<S: TickerSource> Feeder for PollingFeeder<S> {
    fn id(&self) -> &str {
        self.source.name()
    }

    async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(venue = self.source.name(), "Feeder already started");
            return;
        }

        info!(
            venue = self.source.name(),
            interval_secs = self.interval.as_secs(),
            "Starting polling feeder"
        );
        *self.state.write() = FeederState::Connecting;

        let task = tokio::spawn(Self::poll_loop(
            Arc::clone(&self.source),
            self.symbols.clone(),
            self.interval,
            Arc::clone(&self.tickers),
            Arc::clone(&self.state),
            Arc::clone(&self.last_update),
            self.shutdown.clone(),
        ));
        self.tasks.lock().await.push(task);
    }

    async fn stop(&self, timeout: Duration) {
        info!(venue = self.source.name(), "Stopping polling feeder");
        self.shutdown.cancel();

        let mut tasks = self.tasks.lock().await;
        for mut handle in tasks.drain(..) {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                warn!(venue = self.source.name(), "Poll loop did not stop in time, aborting");
                handle.abort();
            }
        }
        *self.state.write() = FeederState::Stopped;
    }

    /// Ticker-only feeder: no order books.
    fn order_book(&self, _symbol: &str, _depth: usize) -> OrderBookLevels {
        (Vec::new(), Vec::new())
    }

    fn tickers(&self) -> HashMap<String, TickerSnapshot> {
        self.tickers
            .snapshot()
            .iter()
            .map(|(symbol, ticker)| (to_external(symbol), ticker.clone()))
            .collect()
    }

    fn status(&self) -> FeederHandle {
        FeederHandle {
            id: self.source.name().to_string(),
            symbols: self.symbols.clone(),
            state: *self.state.read(),
            last_update: *self.last_update.read(),
        }
    }
}

/// OKX spot tickers over REST.
pub struct OkxTickerSource {
    rest_base: String,
    http: Client,
}

impl OkxTickerSource {
    const DEFAULT_REST_BASE: &'static str = "https://www.okx.com";

    pub fn new() -> FeedResult<Self> {
        Self::with_base(Self::DEFAULT_REST_BASE)
    }

    pub fn with_base(rest_base: impl Into<String>) -> FeedResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| FeedError::Snapshot(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            rest_base: rest_base.into(),
            http,
        })
    }

    /// `BTCUSDT` -> `BTC-USDT`.
    fn inst_id(symbol: &str) -> String {
        to_external(symbol).replace('/', "-")
    }

    fn parse_ticker(entry: &Value) -> Option<(String, TickerSnapshot)> {
        let inst_id = entry["instId"].as_str()?;
        let last = Price::parse(entry["lastPx"].as_str().or(entry["last"].as_str())?).ok()?;
        let optional = |key: &str| {
            entry[key]
                .as_str()
                .filter(|s| !s.is_empty())
                .and_then(|s| Price::parse(s).ok())
        };

        Some((
            to_internal(inst_id),
            TickerSnapshot::new(last, optional("bidPx"), optional("askPx")),
        ))
    }

    async fn get(&self, url: &str) -> FeedResult<Value> {
        self.http
            .get(url)
            .send()
            .await
            .map_err(|e| FeedError::Snapshot(e.to_string()))?
            .json()
            .await
            .map_err(|e| FeedError::Snapshot(e.to_string()))
    }
}

#[async_trait]
impl TickerSource for OkxTickerSource {
    fn name(&self) -> &'static str {
        "okx"
    }

    async fn fetch_all(&self) -> FeedResult<HashMap<String, TickerSnapshot>> {
        let url = format!("{}/api/v5/market/tickers?instType=SPOT", self.rest_base);
        let body = self.get(&url).await?;

        let entries = body["data"]
            .as_array()
            .ok_or_else(|| FeedError::InvalidData("tickers response missing data".to_string()))?;
        Ok(entries.iter().filter_map(Self::parse_ticker).collect())
    }

    async fn fetch_one(&self, symbol: &str) -> FeedResult<TickerSnapshot> {
        let url = format!(
            "{}/api/v5/market/ticker?instId={}",
            self.rest_base,
            Self::inst_id(symbol)
        );
        let body = self.get(&url).await?;

        body["data"]
            .as_array()
            .and_then(|data| data.first())
            .and_then(Self::parse_ticker)
            .map(|(_, ticker)| ticker)
            .ok_or_else(|| FeedError::InvalidData(format!("No ticker for {symbol}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct StaticSource {
        bulk: HashMap<String, TickerSnapshot>,
        fail: bool,
    }

    #[async_trait]
    impl TickerSource for StaticSource {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn fetch_all(&self) -> FeedResult<HashMap<String, TickerSnapshot>> {
            if self.fail {
                return Err(FeedError::Snapshot("boom".to_string()));
            }
            Ok(self.bulk.clone())
        }

        async fn fetch_one(&self, symbol: &str) -> FeedResult<TickerSnapshot> {
            self.bulk
                .get(&to_internal(symbol))
                .cloned()
                .ok_or_else(|| FeedError::InvalidData(format!("No ticker for {symbol}")))
        }
    }

    fn bulk_of(pairs: &[(&str, &str)]) -> HashMap<String, TickerSnapshot> {
        pairs
            .iter()
            .map(|(symbol, price)| {
                (
                    symbol.to_string(),
                    TickerSnapshot::new(Price::parse(price).unwrap(), None, None),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_poll_once_filters_to_configured_symbols() {
        let source = Arc::new(StaticSource {
            bulk: bulk_of(&[("BTCUSDT", "50000"), ("DOGEUSDT", "0.1")]),
            fail: false,
        });

        let map = PollingFeeder::poll_once(&source, &["BTCUSDT".to_string()])
            .await
            .unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("BTCUSDT"));
    }

    #[tokio::test]
    async fn test_poll_once_falls_back_to_per_symbol() {
        // Bulk returns empty; the per-symbol path must still produce
        // the configured symbol.
        struct EmptyBulk;

        #[async_trait]
        impl TickerSource for EmptyBulk {
            fn name(&self) -> &'static str {
                "emptybulk"
            }
            async fn fetch_all(&self) -> FeedResult<HashMap<String, TickerSnapshot>> {
                Ok(HashMap::new())
            }
            async fn fetch_one(&self, _symbol: &str) -> FeedResult<TickerSnapshot> {
                Ok(TickerSnapshot::new(Price::new(dec!(1)), None, None))
            }
        }

        let source = Arc::new(EmptyBulk);
        let map = PollingFeeder::poll_once(&source, &["BTCUSDT".to_string()])
            .await
            .unwrap();
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn test_feeder_lifecycle_and_atomic_swap() {
        let feeder = PollingFeeder::new(
            StaticSource {
                bulk: bulk_of(&[("BTCUSDT", "50000")]),
                fail: false,
            },
            vec!["BTCUSDT".to_string()],
            Duration::from_millis(10),
        );

        feeder.start().await;
        feeder.start().await; // idempotent

        tokio::time::sleep(Duration::from_millis(50)).await;
        let tickers = feeder.tickers();
        assert_eq!(tickers.get("BTC/USDT").unwrap().last.inner(), dec!(50000));
        assert_eq!(feeder.status().state, FeederState::Connected);

        feeder.stop(Duration::from_secs(1)).await;
        assert_eq!(feeder.status().state, FeederState::Stopped);
    }

    #[tokio::test]
    async fn test_failures_do_not_clear_last_good_map() {
        let feeder = PollingFeeder::new(
            StaticSource {
                bulk: bulk_of(&[]),
                fail: true,
            },
            vec!["BTCUSDT".to_string()],
            Duration::from_millis(10),
        );

        feeder.start().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(feeder.tickers().is_empty());
        assert_ne!(feeder.status().state, FeederState::Connected);
        feeder.stop(Duration::from_secs(1)).await;
    }

    #[test]
    fn test_repeat_error_throttled_within_window() {
        let mut throttle = ErrorThrottle::new(Duration::from_secs(30));
        assert!(throttle.should_log("connection refused"));
        assert!(!throttle.should_log("connection refused"));
        assert!(!throttle.should_log("connection refused"));
    }

    #[test]
    fn test_repeat_error_logged_again_after_window() {
        let mut throttle = ErrorThrottle::new(Duration::from_millis(20));
        assert!(throttle.should_log("connection refused"));
        assert!(!throttle.should_log("connection refused"));

        std::thread::sleep(Duration::from_millis(30));
        assert!(throttle.should_log("connection refused"));
        // Logging restarts the window.
        assert!(!throttle.should_log("connection refused"));
    }

    #[test]
    fn test_different_error_logged_immediately() {
        let mut throttle = ErrorThrottle::new(Duration::from_secs(30));
        assert!(throttle.should_log("connection refused"));
        assert!(throttle.should_log("timeout"));
        // The new message replaces the tracked one; the old message
        // counts as fresh again.
        assert!(throttle.should_log("connection refused"));
        assert!(!throttle.should_log("connection refused"));
    }

    #[test]
    fn test_success_resets_throttle() {
        let mut throttle = ErrorThrottle::new(Duration::from_secs(30));
        assert!(throttle.should_log("connection refused"));
        throttle.reset();
        assert!(throttle.should_log("connection refused"));
    }

    #[test]
    fn test_order_book_is_always_empty() {
        let feeder = PollingFeeder::new(
            StaticSource {
                bulk: HashMap::new(),
                fail: false,
            },
            Vec::new(),
            Duration::from_secs(5),
        );
        let (asks, bids) = feeder.order_book("BTCUSDT", 5);
        assert!(asks.is_empty());
        assert!(bids.is_empty());
    }
}
