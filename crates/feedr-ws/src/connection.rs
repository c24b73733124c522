//! WebSocket connection manager.
//!
//! Handles connection lifecycle, chunked subscription, keepalive,
//! resubscribe retries and automatic reconnection with exponential
//! backoff. Everything venue-specific is delegated to a
//! [`VenueStream`] implementation; decoded events are forwarded to
//! the owning feeder over an mpsc channel.

use crate::backoff::Backoff;
use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::stream::{VenueEvent, VenueStream};
use crate::subscription::SubscriptionTracker;
use feedr_book::FeedError;
use feedr_core::FeederState;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Venue-independent connection tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Base delay for exponential reconnect backoff.
    pub backoff_base_ms: u64,
    /// Cap for exponential reconnect backoff.
    pub backoff_max_ms: u64,
    /// Default client ping interval (venues may advertise their own).
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this.
    pub heartbeat_timeout_ms: u64,
    /// Override for the venue's per-connection topic limit.
    pub chunk_size: Option<usize>,
    /// Override for the venue's inter-chunk pause.
    pub chunk_pause_ms: Option<u64>,
    /// A symbol with no first update within this window gets
    /// resubscribed.
    pub resubscribe_timeout_secs: u64,
    /// Resubscribe attempts before a symbol is marked exhausted.
    pub max_resubscribe_retries: u32,
    /// When set, venue-advertised ping intervals are ignored.
    pub ping_interval_override_ms: Option<u64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: Backoff::DEFAULT_BASE_MS,
            backoff_max_ms: Backoff::DEFAULT_MAX_MS,
            heartbeat_interval_ms: 20_000,
            heartbeat_timeout_ms: 10_000,
            chunk_size: None,
            chunk_pause_ms: None,
            resubscribe_timeout_secs: 30,
            max_resubscribe_retries: 3,
            ping_interval_override_ms: None,
        }
    }
}

/// Connection manager for one venue stream.
pub struct ConnectionManager<P: VenueStream> {
    protocol: Arc<P>,
    config: ConnectionConfig,
    /// Internal symbols to subscribe.
    symbols: Vec<String>,
    state: Arc<RwLock<FeederState>>,
    tracker: Arc<SubscriptionTracker>,
    heartbeat: Arc<HeartbeatManager>,
    event_tx: mpsc::Sender<VenueEvent>,
    shutdown: CancellationToken,
}

impl<P: VenueStream> ConnectionManager<P> {
    pub fn new(
        protocol: Arc<P>,
        symbols: Vec<String>,
        config: ConnectionConfig,
        event_tx: mpsc::Sender<VenueEvent>,
        state: Arc<RwLock<FeederState>>,
        shutdown: CancellationToken,
    ) -> Self {
        let heartbeat = Arc::new(HeartbeatManager::new(
            config
                .ping_interval_override_ms
                .unwrap_or(config.heartbeat_interval_ms),
            config.heartbeat_timeout_ms,
        ));
        Self {
            protocol,
            config,
            symbols,
            state,
            tracker: Arc::new(SubscriptionTracker::new()),
            heartbeat,
            event_tx,
            shutdown,
        }
    }

    /// Subscription tracker (shared with the owning feeder for
    /// diagnostics).
    pub fn tracker(&self) -> Arc<SubscriptionTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn state(&self) -> FeederState {
        *self.state.read()
    }

    fn set_state(&self, state: FeederState) {
        *self.state.write() = state;
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run the connect/receive/reconnect loop until shutdown.
    ///
    /// Every error inside one connection attempt is absorbed into a
    /// reconnect; this function only returns on shutdown.
    pub async fn run(&self) {
        let mut backoff = Backoff::new(self.config.backoff_base_ms, self.config.backoff_max_ms);

        loop {
            if self.is_shutdown() {
                self.set_state(FeederState::Stopped);
                return;
            }

            self.set_state(FeederState::Connecting);

            match self.connect_once(&mut backoff).await {
                Ok(()) => {
                    info!(venue = self.protocol.name(), "Connection closed");
                }
                Err(e) => {
                    warn!(venue = self.protocol.name(), error = %e, "Connection error");
                }
            }

            if self.is_shutdown() {
                self.set_state(FeederState::Stopped);
                return;
            }

            self.set_state(FeederState::Reconnecting);
            let delay = backoff.next_delay();
            warn!(
                venue = self.protocol.name(),
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown.cancelled() => {
                    self.set_state(FeederState::Stopped);
                    return;
                }
            }

            self.tracker.reset();
        }
    }

    async fn connect_once(&self, backoff: &mut Backoff) -> WsResult<()> {
        let url = self.protocol.endpoint(&self.symbols).await?;
        info!(venue = self.protocol.name(), url = %url, "Connecting");

        let (ws_stream, _response) =
            connect_async_tls_with_config(&url, None, true, None).await?;
        let (mut write, mut read) = ws_stream.split();

        self.set_state(FeederState::Connected);
        backoff.reset();
        info!(venue = self.protocol.name(), "Connected");

        self.send_subscriptions(&mut write).await?;
        self.heartbeat.reset();

        self.receive_loop(&mut write, &mut read).await
    }

    /// Send subscribe requests in venue-bounded chunks and seed the
    /// tracker.
    async fn send_subscriptions(&self, write: &mut WsSink) -> WsResult<()> {
        let chunk_size = self
            .config
            .chunk_size
            .unwrap_or_else(|| self.protocol.chunk_size())
            .max(1);
        let pause = self
            .config
            .chunk_pause_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.protocol.chunk_pause());

        let chunks: Vec<&[String]> = self.symbols.chunks(chunk_size).collect();
        let total = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            for frame in self.protocol.subscribe_frames(chunk) {
                write.send(Message::Text(frame)).await?;
            }
            debug!(
                venue = self.protocol.name(),
                chunk = i + 1,
                total,
                symbols = chunk.len(),
                "Subscribe chunk sent"
            );

            if !pause.is_zero() && i + 1 < total {
                tokio::select! {
                    () = tokio::time::sleep(pause) => {}
                    () = self.shutdown.cancelled() => return Ok(()),
                }
            }
        }

        self.tracker.seed(&self.symbols);
        info!(
            venue = self.protocol.name(),
            symbols = self.symbols.len(),
            "Subscriptions sent"
        );
        Ok(())
    }

    async fn receive_loop(&self, write: &mut WsSink, read: &mut WsSource) -> WsResult<()> {
        let retry_timeout = Duration::from_secs(self.config.resubscribe_timeout_secs);
        let mut resub_tick =
            tokio::time::interval(Duration::from_secs(self.config.resubscribe_timeout_secs.max(2) / 2));
        resub_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        resub_tick.reset();

        loop {
            tokio::select! {
                // Shutdown has the highest priority: it must be
                // observed within one loop iteration.
                () = self.shutdown.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "Close frame failed during shutdown");
                    }
                    self.set_state(FeederState::Stopped);
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(text.as_bytes(), write).await?;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            self.handle_frame(&data, write).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(venue = self.protocol.name(), code, %reason, "Closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            warn!(venue = self.protocol.name(), "Stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                _ = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send_heartbeat() {
                        match self.protocol.client_ping() {
                            Some(frame) => write.send(Message::Text(frame)).await?,
                            None => write.send(Message::Ping(Vec::new())).await?,
                        }
                        self.heartbeat.record_ping();
                    }
                }

                _ = resub_tick.tick() => {
                    let due = self
                        .tracker
                        .due_for_retry(retry_timeout, self.config.max_resubscribe_retries);
                    for symbol in due {
                        info!(venue = self.protocol.name(), symbol = %symbol, "Resubscribing");
                        for frame in self.protocol.subscribe_frames(std::slice::from_ref(&symbol)) {
                            write.send(Message::Text(frame)).await?;
                        }
                    }
                }
            }
        }
    }

    /// Decode one frame and forward its events.
    ///
    /// An undecodable frame is dropped (bounded sample forwarded for
    /// accounting); no state is mutated.
    async fn handle_frame(&self, raw: &[u8], write: &mut WsSink) -> WsResult<()> {
        self.heartbeat.record_message();

        let events = match self.protocol.decode(raw) {
            Ok(events) => events,
            Err(FeedError::UndecodableFrame { sample }) => {
                warn!(venue = self.protocol.name(), %sample, "Dropping undecodable frame");
                self.forward(VenueEvent::Dropped { sample }).await;
                return Ok(());
            }
            Err(e) => {
                debug!(venue = self.protocol.name(), error = %e, "Dropping bad frame");
                return Ok(());
            }
        };

        for event in events {
            match event {
                VenueEvent::PingRequest(reply) => {
                    write.send(Message::Text(reply)).await?;
                }
                VenueEvent::Pong => {
                    self.heartbeat.record_pong();
                }
                VenueEvent::AdvertisedPingInterval(ms) => {
                    if self.config.ping_interval_override_ms.is_none() {
                        self.heartbeat.set_interval_ms(ms);
                    }
                }
                VenueEvent::Ack { topic } => {
                    debug!(venue = self.protocol.name(), %topic, "Subscription acknowledged");
                }
                VenueEvent::Ignore => {}
                VenueEvent::Delta(ref delta) => {
                    self.tracker.record_update(&delta.symbol);
                    self.forward(event).await;
                }
                VenueEvent::Replace { ref symbol, .. } | VenueEvent::Ticker { ref symbol, .. } => {
                    self.tracker.record_update(symbol);
                    self.forward(event).await;
                }
                VenueEvent::Dropped { .. } => {
                    self.forward(event).await;
                }
            }
        }

        Ok(())
    }

    async fn forward(&self, event: VenueEvent) {
        if self.event_tx.send(event).await.is_err() {
            warn!(venue = self.protocol.name(), "Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.backoff_base_ms, 1_000);
        assert_eq!(config.backoff_max_ms, 30_000);
        assert_eq!(config.max_resubscribe_retries, 3);
        assert!(config.ping_interval_override_ms.is_none());
    }
}
