//! Binance 24hr ticker items (`!ticker@arr` stream).
//! See https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams for field names.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::market::market_data::{ChangeDirection, NormalizedRecord};
use crate::market::providers::{home_quote_token, parse_body, symbol_field};

const HOME_QUOTE: &str = "USDT";

// Binance uses single-letter keys; `P` is the change in percent, `Q` the
// quantity of the last trade and `q` the 24h quote volume.
#[derive(Debug, Deserialize)]
struct BinanceTicker {
    #[serde(rename = "c")]
    last_price: Decimal,
    #[serde(rename = "Q")]
    last_quantity: Decimal,
    #[serde(rename = "P")]
    change_percent: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "q")]
    quote_volume: Decimal,
}

pub fn decode_item(item: Value) -> Result<Option<NormalizedRecord>, DecodeError> {
    let Some(symbol) = symbol_field(&item, "s") else {
        return Ok(None);
    };
    let token = home_quote_token(&symbol, HOME_QUOTE);
    let ticker: BinanceTicker = parse_body(item, &token)?;
    let change_rate = ticker.change_percent / Decimal::ONE_HUNDRED;

    Ok(Some(NormalizedRecord {
        token,
        trade_price: ticker.last_price,
        trade_volume: ticker.last_quantity,
        change_rate,
        change_direction: ChangeDirection::from_rate(change_rate),
        highest_price: ticker.high,
        lowest_price: ticker.low,
        opening_price: ticker.open,
        acc_trade_price_24h: ticker.quote_volume,
    }))
}
