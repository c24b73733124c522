//! Core domain types for the feedr market-data feeder.
//!
//! This crate provides the fundamental types shared by all feeders:
//! - `Price`, `Qty`: precision-safe numeric types
//! - `symbol`: venue-neutral symbol normalization (`BTCUSDT` / `BTC/USDT`)
//! - `BookView`, `TickerSnapshot`: the read-side data model
//! - `FeederState`, `FeederHandle`: diagnostic views

pub mod decimal;
pub mod error;
pub mod symbol;
pub mod types;

pub use decimal::{Price, Qty};
pub use error::{CoreError, Result};
pub use symbol::{to_external, to_internal};
pub use types::{BookView, FeederHandle, FeederState, PriceLevel, TickerSnapshot};
