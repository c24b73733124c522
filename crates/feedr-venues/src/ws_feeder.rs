//! Generic WebSocket feeder engine.
//!
//! `WsFeeder` owns the connection manager for one venue, consumes its
//! decoded events, runs the sequence-aware book synchronization and
//! exposes the `Feeder` read contract. One feeder runs one network
//! loop; a slow venue never blocks the others.

use crate::feeder::{Feeder, OrderBookLevels};
use async_trait::async_trait;
use feedr_book::{BookStore, DeltaOutcome, FeedError, TickerStore, DEFAULT_MAX_DEPTH};
use feedr_core::symbol::{to_external, to_internal};
use feedr_core::{FeederHandle, FeederState, TickerSnapshot};
use feedr_telemetry::metrics;
use feedr_ws::{ConnectionConfig, ConnectionManager, VenueEvent, VenueStream};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timeout for one REST snapshot fetch during resync.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval for the diagnostic state watcher.
const WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// A streaming feeder for one venue, generic over its protocol.
pub struct WsFeeder<P: VenueStream> {
    id: &'static str,
    protocol: Arc<P>,
    symbols: Vec<String>,
    books: Arc<BookStore>,
    tickers: Arc<TickerStore>,
    state: Arc<RwLock<FeederState>>,
    manager: Arc<ConnectionManager<P>>,
    event_rx: TokioMutex<Option<mpsc::Receiver<VenueEvent>>>,
    shutdown: CancellationToken,
    started: AtomicBool,
    tasks: TokioMutex<Vec<JoinHandle<()>>>,
}

impl<P: VenueStream> WsFeeder<P> {
    /// Build a feeder for `symbols` (any separator form).
    pub fn new(protocol: P, symbols: Vec<String>, config: ConnectionConfig) -> Self {
        let protocol = Arc::new(protocol);
        let id = protocol.name();
        let symbols: Vec<String> = symbols.iter().map(|s| to_internal(s)).collect();
        let state = Arc::new(RwLock::new(FeederState::Disconnected));
        let shutdown = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(1024);

        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&protocol),
            symbols.clone(),
            config,
            event_tx,
            Arc::clone(&state),
            shutdown.clone(),
        ));

        Self {
            id,
            protocol,
            symbols,
            books: Arc::new(BookStore::new(DEFAULT_MAX_DEPTH)),
            tickers: Arc::new(TickerStore::new()),
            state,
            manager,
            event_rx: TokioMutex::new(Some(event_rx)),
            shutdown,
            started: AtomicBool::new(false),
            tasks: TokioMutex::new(Vec::new()),
        }
    }

    /// Book store handle (for tests and diagnostics).
    pub fn books(&self) -> Arc<BookStore> {
        Arc::clone(&self.books)
    }

    async fn consume_events(
        venue: &'static str,
        protocol: Arc<P>,
        books: Arc<BookStore>,
        tickers: Arc<TickerStore>,
        mut rx: mpsc::Receiver<VenueEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                VenueEvent::Delta(delta) => {
                    if books.needs_resync(&delta.symbol) {
                        Self::resync(venue, &protocol, &books, &delta.symbol).await;
                    }
                    match books.apply_delta(&delta) {
                        DeltaOutcome::Applied => {
                            metrics::DELTAS_APPLIED_TOTAL
                                .with_label_values(&[venue])
                                .inc();
                        }
                        DeltaOutcome::Gap { expected, got } => {
                            // Delta discarded; fresh snapshot now so the
                            // next delta applies cleanly.
                            let err = FeedError::SequenceGap {
                                symbol: delta.symbol.clone(),
                                expected,
                                got,
                            };
                            warn!(venue, error = %err, "Sequence gap, resyncing");
                            metrics::SEQUENCE_GAPS_TOTAL
                                .with_label_values(&[venue])
                                .inc();
                            Self::resync(venue, &protocol, &books, &delta.symbol).await;
                        }
                        DeltaOutcome::Stale => {
                            debug!(venue, symbol = %delta.symbol, "Stale delta dropped");
                        }
                        // Snapshot fetch failed above; the stale book
                        // stays visible and resync retries on the next
                        // delta.
                        DeltaOutcome::Unsynced => {}
                    }
                }
                VenueEvent::Replace {
                    symbol,
                    asks,
                    bids,
                    sequence,
                } => {
                    books.replace(&symbol, &asks, &bids, sequence);
                    metrics::DELTAS_APPLIED_TOTAL
                        .with_label_values(&[venue])
                        .inc();
                }
                VenueEvent::Ticker { symbol, ticker } => {
                    tickers.upsert(&symbol, ticker);
                }
                VenueEvent::Dropped { .. } => {
                    metrics::FRAMES_DROPPED_TOTAL
                        .with_label_values(&[venue])
                        .inc();
                }
                // Keepalive and ack events are handled by the
                // connection manager.
                _ => {}
            }
        }
        debug!(venue, "Event loop exited");
    }

    async fn resync(venue: &'static str, protocol: &Arc<P>, books: &Arc<BookStore>, symbol: &str) {
        match tokio::time::timeout(SNAPSHOT_TIMEOUT, protocol.fetch_snapshot(symbol)).await {
            Ok(Ok(snapshot)) => {
                info!(venue, symbol, sequence = snapshot.sequence, "Snapshot installed");
                books.install_snapshot(&snapshot);
                metrics::RESYNCS_TOTAL
                    .with_label_values(&[venue, "ok"])
                    .inc();
            }
            Ok(Err(e)) => {
                warn!(venue, symbol, error = %e, "Snapshot fetch failed, keeping stale book");
                metrics::RESYNCS_TOTAL
                    .with_label_values(&[venue, "error"])
                    .inc();
            }
            Err(_) => {
                warn!(venue, symbol, "Snapshot fetch timed out, keeping stale book");
                metrics::RESYNCS_TOTAL
                    .with_label_values(&[venue, "timeout"])
                    .inc();
            }
        }
    }

    /// Periodically export connection-state gauges.
    async fn watch_state(
        venue: &'static str,
        state: Arc<RwLock<FeederState>>,
        manager: Arc<ConnectionManager<P>>,
        shutdown: CancellationToken,
    ) {
        let mut prev = FeederState::Disconnected;
        let mut prev_retries = 0u64;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(WATCH_INTERVAL) => {}
            }

            let current = *state.read();
            metrics::WS_CONNECTED
                .with_label_values(&[venue])
                .set(if current == FeederState::Connected { 1.0 } else { 0.0 });
            if current == FeederState::Reconnecting && prev != FeederState::Reconnecting {
                metrics::WS_RECONNECT_TOTAL.with_label_values(&[venue]).inc();
            }
            let tracker = manager.tracker();
            metrics::SUBSCRIPTIONS_EXHAUSTED
                .with_label_values(&[venue])
                .set(tracker.exhausted().len() as i64);
            let retries = tracker.retries_total();
            if retries > prev_retries {
                metrics::RESUBSCRIBES_TOTAL
                    .with_label_values(&[venue])
                    .inc_by((retries - prev_retries) as f64);
            }
            prev_retries = retries;
            prev = current;
        }
    }
}

#[async_trait]
impl<P: VenueStream> Feeder for WsFeeder<P> {
    fn id(&self) -> &str {
        self.id
    }

    async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(venue = self.id, "Feeder already started");
            return;
        }

        let Some(rx) = self.event_rx.lock().await.take() else {
            warn!(venue = self.id, "Event receiver missing, cannot start");
            return;
        };

        info!(venue = self.id, symbols = self.symbols.len(), "Starting feeder");

        let manager = Arc::clone(&self.manager);
        let run_task = tokio::spawn(async move { manager.run().await });

        let consume_task = tokio::spawn(Self::consume_events(
            self.id,
            Arc::clone(&self.protocol),
            Arc::clone(&self.books),
            Arc::clone(&self.tickers),
            rx,
            self.shutdown.clone(),
        ));

        let watch_task = tokio::spawn(Self::watch_state(
            self.id,
            Arc::clone(&self.state),
            Arc::clone(&self.manager),
            self.shutdown.clone(),
        ));

        let mut tasks = self.tasks.lock().await;
        tasks.push(run_task);
        tasks.push(consume_task);
        tasks.push(watch_task);
    }

    async fn stop(&self, timeout: Duration) {
        info!(venue = self.id, "Stopping feeder");
        self.shutdown.cancel();

        let mut tasks = self.tasks.lock().await;
        for mut handle in tasks.drain(..) {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(venue = self.id, "Task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
        *self.state.write() = FeederState::Stopped;
    }

    fn order_book(&self, symbol: &str, depth: usize) -> OrderBookLevels {
        self.books.order_book(symbol, depth)
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
            id: self.id.to_string(),
            symbols: self.symbols.clone(),
            state: *self.state.read(),
            last_update: self.books.last_update(),
        }
    }
}
