//! Prometheus metrics for the feeder subsystem.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration
//! failure indicates a fatal configuration error (e.g. duplicate
//! metric names) that should crash at startup rather than fail
//! silently. These panics only occur during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_int_gauge_vec, CounterVec, GaugeVec,
    IntGaugeVec,
};

/// Connection state per venue (1 = connected, 0 = not).
pub static WS_CONNECTED: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "feedr_ws_connected",
        "WebSocket connection state (1=connected)",
        &["venue"]
    )
    .unwrap()
});

/// Total reconnection attempts per venue.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "feedr_ws_reconnect_total",
        "Total WebSocket reconnection attempts",
        &["venue"]
    )
    .unwrap()
});

/// Deltas applied to order books.
pub static DELTAS_APPLIED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "feedr_deltas_applied_total",
        "Order-book deltas applied",
        &["venue"]
    )
    .unwrap()
});

/// Sequence gaps detected (each forces a resnapshot).
pub static SEQUENCE_GAPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "feedr_sequence_gaps_total",
        "Sequence gaps detected in delta streams",
        &["venue"]
    )
    .unwrap()
});

/// REST snapshot resyncs, by outcome.
pub static RESYNCS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "feedr_resyncs_total",
        "REST snapshot resyncs",
        &["venue", "outcome"]
    )
    .unwrap()
});

/// Frames dropped by the decode pipeline.
pub static FRAMES_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "feedr_frames_dropped_total",
        "Frames dropped as undecodable",
        &["venue"]
    )
    .unwrap()
});

/// Resubscribe attempts sent by the periodic scan.
pub static RESUBSCRIBES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "feedr_resubscribes_total",
        "Resubscribe attempts for silent symbols",
        &["venue"]
    )
    .unwrap()
});

/// Symbols currently marked exhausted per venue.
pub static SUBSCRIPTIONS_EXHAUSTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "feedr_subscriptions_exhausted",
        "Symbols excluded after exhausting resubscribe retries",
        &["venue"]
    )
    .unwrap()
});

/// Polling fetch failures per venue.
pub static POLL_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "feedr_poll_failures_total",
        "REST polling fetch failures",
        &["venue"]
    )
    .unwrap()
});
