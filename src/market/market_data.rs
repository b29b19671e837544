//! Normalized market data types.
//!
//! Every exchange's ticker payload is reduced to the same [`NormalizedRecord`]
//! shape, so consumers can compare prices across markets without knowing
//! where a record came from.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of the price change against the reference (opening/previous) price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeDirection {
    Rise,
    Fall,
    Even,
}

impl ChangeDirection {
    /// Derives the direction from a signed change rate.
    pub fn from_rate(rate: Decimal) -> Self {
        if rate.is_zero() {
            ChangeDirection::Even
        } else if rate.is_sign_negative() {
            ChangeDirection::Fall
        } else {
            ChangeDirection::Rise
        }
    }
}

/// Snapshot of one traded instrument.
///
/// `change_rate` is a signed ratio (`-0.0123` means -1.23%) regardless of
/// whether the source exchange reports a ratio or a percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub token: String,
    pub trade_price: Decimal,
    pub trade_volume: Decimal,
    pub change_rate: Decimal,
    #[serde(rename = "rateChangeDirection")]
    pub change_direction: ChangeDirection,
    pub highest_price: Decimal,
    pub lowest_price: Decimal,
    pub opening_price: Decimal,
    #[serde(rename = "24hAccumulatedTradePrice")]
    pub acc_trade_price_24h: Decimal,
}

/// Records of one market keyed by token. One map is produced per exchange tag
/// per decoded message; a repeated token keeps the later record.
pub type MarketDataMap = HashMap<String, NormalizedRecord>;
