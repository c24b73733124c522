//! Venue-agnostic WebSocket machinery for feedr.
//!
//! Provides the pieces every streaming venue client shares:
//! - Automatic reconnection with exponential backoff
//! - Chunked subscription with bounded resubscribe retries
//! - Heartbeat monitoring with venue-advertised interval support
//! - The `VenueStream` protocol seam each venue implements

pub mod backoff;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod stream;
pub mod subscription;

pub use backoff::Backoff;
pub use connection::{ConnectionConfig, ConnectionManager};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatManager;
pub use stream::{VenueEvent, VenueStream};
pub use subscription::{SubscriptionEntry, SubscriptionTracker};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
