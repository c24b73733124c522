//! Heartbeat management for venue connections.
//!
//! Monitors connection health by tracking ping/pong timing and
//! message activity. Some venues advertise their expected ping
//! cadence in a connection-establishment message; the interval can
//! therefore be adjusted after construction.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

/// Heartbeat manager for one venue connection.
pub struct HeartbeatManager {
    /// How often to send a client ping (may be venue-advertised).
    interval_ms: RwLock<u64>,
    /// How long to wait for a pong.
    timeout_ms: u64,
    last_ping: RwLock<Option<DateTime<Utc>>>,
    last_pong: RwLock<Option<DateTime<Utc>>>,
    /// Last message of any kind.
    last_message: RwLock<DateTime<Utc>>,
    waiting_for_pong: RwLock<bool>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms: RwLock::new(interval_ms),
            timeout_ms,
            last_ping: RwLock::new(None),
            last_pong: RwLock::new(None),
            last_message: RwLock::new(Utc::now()),
            waiting_for_pong: RwLock::new(false),
        }
    }

    /// Reset heartbeat state (called on connection).
    pub fn reset(&self) {
        *self.last_ping.write() = None;
        *self.last_pong.write() = None;
        *self.last_message.write() = Utc::now();
        *self.waiting_for_pong.write() = false;
    }

    /// Adopt a venue-advertised ping interval.
    pub fn set_interval_ms(&self, interval_ms: u64) {
        debug!(interval_ms, "Adopting advertised ping interval");
        *self.interval_ms.write() = interval_ms;
    }

    pub fn interval_ms(&self) -> u64 {
        *self.interval_ms.read()
    }

    /// Record that a ping was sent.
    pub fn record_ping(&self) {
        *self.last_ping.write() = Some(Utc::now());
        *self.waiting_for_pong.write() = true;
    }

    /// Record that a pong was received.
    pub fn record_pong(&self) {
        let now = Utc::now();
        *self.last_pong.write() = Some(now);
        *self.waiting_for_pong.write() = false;

        if let Some(ping_time) = *self.last_ping.read() {
            let rtt_ms = (now - ping_time).num_milliseconds();
            debug!(rtt_ms, "Received pong");
        }
    }

    /// Record that any message was received.
    pub fn record_message(&self) {
        *self.last_message.write() = Utc::now();
    }

    /// Check if an outstanding ping has gone unanswered too long.
    pub fn is_timed_out(&self) -> bool {
        if !*self.waiting_for_pong.read() {
            return false;
        }
        if let Some(ping_time) = *self.last_ping.read() {
            let elapsed_ms = (Utc::now() - ping_time).num_milliseconds();
            return elapsed_ms > self.timeout_ms as i64;
        }
        false
    }

    /// Time since the last received message.
    pub fn time_since_last_message_ms(&self) -> i64 {
        (Utc::now() - *self.last_message.read()).num_milliseconds()
    }

    /// Whether a client ping should be sent now.
    pub fn should_send_heartbeat(&self) -> bool {
        if *self.waiting_for_pong.read() {
            return false;
        }
        self.time_since_last_message_ms() >= self.interval_ms() as i64
    }

    /// Wait until the next heartbeat check is due.
    pub async fn wait_for_check(&self) {
        tokio::time::sleep(Duration::from_millis(self.interval_ms() / 2)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let hb = HeartbeatManager::new(20_000, 10_000);
        assert!(!hb.is_timed_out());
        assert!(!hb.should_send_heartbeat());
    }

    #[test]
    fn test_ping_pong_cycle() {
        let hb = HeartbeatManager::new(20_000, 10_000);
        hb.record_ping();
        assert!(*hb.waiting_for_pong.read());
        hb.record_pong();
        assert!(!*hb.waiting_for_pong.read());
    }

    #[test]
    fn test_advertised_interval_adopted() {
        let hb = HeartbeatManager::new(20_000, 10_000);
        hb.set_interval_ms(18_000);
        assert_eq!(hb.interval_ms(), 18_000);
    }
}
