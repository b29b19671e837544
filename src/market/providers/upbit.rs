//! Upbit ticker items.
//!
//! Upbit reports an explicit `change` direction and a signed ratio, so both
//! are taken as-is. Market codes are quote-first (`KRW-BTC`).

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::market::market_data::{ChangeDirection, NormalizedRecord};
use crate::market::providers::{parse_body, symbol_field};

/// `KRW-BTC` -> `BTC`; `BTC-ETH` and `USDT-ETH` keep their full code.
const HOME_MARKET: &str = "KRW-";

#[derive(Debug, Deserialize)]
struct UpbitTicker {
    trade_price: Decimal,
    trade_volume: Decimal,
    signed_change_rate: Decimal,
    change: ChangeDirection,
    high_price: Decimal,
    low_price: Decimal,
    opening_price: Decimal,
    acc_trade_price_24h: Decimal,
}

pub fn decode_item(item: Value) -> Result<Option<NormalizedRecord>, DecodeError> {
    let Some(code) = symbol_field(&item, "code") else {
        return Ok(None);
    };
    let token = code
        .strip_prefix(HOME_MARKET)
        .filter(|base| !base.is_empty())
        .unwrap_or(&code)
        .to_string();
    let ticker: UpbitTicker = parse_body(item, &token)?;

    Ok(Some(NormalizedRecord {
        token,
        trade_price: ticker.trade_price,
        trade_volume: ticker.trade_volume,
        change_rate: ticker.signed_change_rate,
        change_direction: ticker.change,
        highest_price: ticker.high_price,
        lowest_price: ticker.low_price,
        opening_price: ticker.opening_price,
        acc_trade_price_24h: ticker.acc_trade_price_24h,
    }))
}
