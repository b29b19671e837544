//! Market identifiers, normalized data, and per-exchange decoding.

pub mod decoder;
pub mod exchange;
pub mod market_data;
pub mod providers;

// Re-exports for convenience
pub use decoder::decode;
pub use exchange::{MarketId, UnknownMarket};
pub use market_data::{ChangeDirection, MarketDataMap, NormalizedRecord};
pub use providers::ItemDecoder;
