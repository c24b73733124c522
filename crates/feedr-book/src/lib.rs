//! Incremental order-book engine for feedr.
//!
//! Provides the sequence-aware delta engine (`SequencedBook`), the
//! per-feeder symbol stores (`BookStore`, `TickerStore`), and the
//! ordered binary frame decode pipeline.

pub mod book;
pub mod decode;
pub mod error;
pub mod store;

pub use book::{BookSnapshot, DeltaOutcome, DepthDelta, SequencedBook, SymbolBook};
pub use decode::decode_frame;
pub use error::{FeedError, FeedResult};
pub use store::{BookStore, TickerStore, DEFAULT_MAX_DEPTH};
