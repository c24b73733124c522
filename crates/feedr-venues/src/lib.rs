//! Per-venue market-data feeders.
//!
//! Each streaming venue implements the `VenueStream` protocol seam;
//! the generic `WsFeeder` engine drives the connection, runs the
//! sequence-aware book synchronization, and exposes the `Feeder` read
//! contract. Venues without a streaming client fall back to the REST
//! `PollingFeeder`.

pub mod binance;
pub mod feeder;
pub mod gateio;
pub mod huobi;
pub mod kucoin;
pub mod polling;
pub mod ws_feeder;

pub use binance::{BinanceConfig, BinanceStream};
pub use feeder::{Feeder, OrderBookLevels};
pub use gateio::{GateioConfig, GateioStream};
pub use huobi::{HuobiConfig, HuobiStream};
pub use kucoin::{KucoinConfig, KucoinStream};
pub use polling::{OkxTickerSource, PollingFeeder, TickerSource};
pub use ws_feeder::WsFeeder;
