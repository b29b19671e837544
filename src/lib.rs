//! Multi-exchange real-time market data ingestion.
//!
//! One supervised WebSocket per market, bounded automatic reconnection, and
//! per-exchange payloads normalized into a single record shape.

pub mod config;
pub mod error;
pub mod feed;
pub mod logging;
pub mod market;

pub use config::FeedConfig;
pub use error::{ConfigError, DecodeError};
pub use feed::{DataCallback, MarketFeed};
pub use market::{ChangeDirection, MarketDataMap, MarketId, NormalizedRecord};
