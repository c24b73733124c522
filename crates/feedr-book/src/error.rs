//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Sequence gap for {symbol}: expected {expected}, got {got}")]
    SequenceGap {
        symbol: String,
        expected: u64,
        got: u64,
    },

    #[error("Undecodable frame (sample: {sample})")]
    UndecodableFrame { sample: String },

    #[error("Snapshot fetch failed: {0}")]
    Snapshot(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;
