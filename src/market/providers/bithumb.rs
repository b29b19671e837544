//! Bithumb ticker items.
//!
//! Bithumb sends every number as a string and reports `chgRate` in percent.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::market::market_data::{ChangeDirection, NormalizedRecord};
use crate::market::providers::{home_quote_token, parse_body, symbol_field};

/// `BTC_KRW` -> `BTC`; pairs on the BTC market keep their full symbol.
const HOME_QUOTE: &str = "_KRW";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BithumbTicker {
    close_price: Decimal,
    volume: Decimal,
    chg_rate: Decimal,
    high_price: Decimal,
    low_price: Decimal,
    open_price: Decimal,
    value: Decimal,
}

pub fn decode_item(item: Value) -> Result<Option<NormalizedRecord>, DecodeError> {
    let Some(symbol) = symbol_field(&item, "symbol") else {
        return Ok(None);
    };
    let token = home_quote_token(&symbol, HOME_QUOTE);
    let ticker: BithumbTicker = parse_body(item, &token)?;
    let change_rate = ticker.chg_rate / Decimal::ONE_HUNDRED;

    Ok(Some(NormalizedRecord {
        token,
        trade_price: ticker.close_price,
        trade_volume: ticker.volume,
        change_rate,
        change_direction: ChangeDirection::from_rate(change_rate),
        highest_price: ticker.high_price,
        lowest_price: ticker.low_price,
        opening_price: ticker.open_price,
        acc_trade_price_24h: ticker.value,
    }))
}
