//! Exponential reconnect backoff.
//!
//! Delays double from a base per failed attempt, capped at a
//! maximum, and reset to the base on a successful connect.

use std::time::Duration;

/// Exponential backoff state for one connection loop.
#[derive(Debug)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    /// Default base delay (1s).
    pub const DEFAULT_BASE_MS: u64 = 1_000;
    /// Default delay cap (30s).
    pub const DEFAULT_MAX_MS: u64 = 30_000;

    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    /// Attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for a given attempt number (1-based), without jitter:
    /// `min(base * 2^(attempt-1), max)`.
    pub fn delay_for_attempt(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
        Duration::from_millis(delay)
    }

    /// Record a failure and return the delay before the next attempt,
    /// with 0-1000ms jitter added.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        Self::delay_for_attempt(self.base_ms, self.max_ms, self.attempt)
            + Duration::from_millis(jitter_ms())
    }

    /// Reset after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE_MS, Self::DEFAULT_MAX_MS)
    }
}

/// Clock-derived jitter (0-1000ms).
fn jitter_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_form() {
        // Nth delay == min(base * 2^(N-1), cap).
        let cases = [
            (1, 1_000),
            (2, 2_000),
            (3, 4_000),
            (4, 8_000),
            (5, 16_000),
            (6, 30_000),
            (7, 30_000),
        ];
        for (attempt, expected_ms) in cases {
            assert_eq!(
                Backoff::delay_for_attempt(1_000, 30_000, attempt),
                Duration::from_millis(expected_ms),
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn test_next_delay_within_jitter_band() {
        let mut backoff = Backoff::new(1_000, 30_000);
        let d = backoff.next_delay();
        assert!(d >= Duration::from_millis(1_000));
        assert!(d < Duration::from_millis(2_001));
        assert_eq!(backoff.attempt(), 1);
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = Backoff::new(1_000, 30_000);
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        let d = backoff.next_delay();
        assert!(d < Duration::from_millis(2_001));
    }

    #[test]
    fn test_large_attempt_saturates_at_cap() {
        assert_eq!(
            Backoff::delay_for_attempt(1_000, 30_000, 100),
            Duration::from_millis(30_000)
        );
    }
}
