//! Error types for decoding and configuration.

use thiserror::Error;

use crate::market::MarketId;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload must be a JSON object keyed by exchange tag")]
    NotAnObject,

    #[error("`{tag}` entry must be an array of records")]
    NotAnArray { tag: MarketId },

    #[error("record `{token}` is invalid: {reason}")]
    InvalidRecord { token: String, reason: String },
}

impl DecodeError {
    /// True when only a single record was rejected, not the whole payload.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::InvalidRecord { .. })
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid endpoint for {market}: {url} ({reason})")]
    InvalidEndpoint {
        market: MarketId,
        url: String,
        reason: String,
    },
}
