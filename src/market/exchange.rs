//! Supported exchanges and their wire tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::market::providers::{self, ItemDecoder};

/// One supported exchange data source.
///
/// The lowercase tag (`"upbit"`, `"bithumb"`, ...) is used both as the
/// top-level key inside multiplexed payloads and in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketId {
    Upbit,
    Bithumb,
    Binance,
    Bybit,
}

impl MarketId {
    pub const ALL: [MarketId; 4] = [
        MarketId::Upbit,
        MarketId::Bithumb,
        MarketId::Binance,
        MarketId::Bybit,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            MarketId::Upbit => "upbit",
            MarketId::Bithumb => "bithumb",
            MarketId::Binance => "binance",
            MarketId::Bybit => "bybit",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|market| market.tag() == tag)
    }

    /// Returns the item decoder for this exchange's payload shape.
    pub fn decoder(self) -> ItemDecoder {
        match self {
            MarketId::Upbit => providers::upbit::decode_item,
            MarketId::Bithumb => providers::bithumb::decode_item,
            MarketId::Binance => providers::binance::decode_item,
            MarketId::Bybit => providers::bybit::decode_item,
        }
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for MarketId {
    type Err = UnknownMarket;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(&s.to_ascii_lowercase()).ok_or_else(|| UnknownMarket(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown market `{0}`")]
pub struct UnknownMarket(pub String);
