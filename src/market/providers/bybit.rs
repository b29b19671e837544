//! Bybit v5 spot tickers.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::market::market_data::{ChangeDirection, NormalizedRecord};
use crate::market::providers::{home_quote_token, parse_body, symbol_field};

const HOME_QUOTE: &str = "USDT";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitTicker {
    last_price: Decimal,
    #[serde(rename = "volume24h")]
    volume_24h: Decimal,
    // already a ratio
    #[serde(rename = "price24hPcnt")]
    price_24h_pcnt: Decimal,
    #[serde(rename = "highPrice24h")]
    high_price_24h: Decimal,
    #[serde(rename = "lowPrice24h")]
    low_price_24h: Decimal,
    #[serde(rename = "prevPrice24h")]
    prev_price_24h: Decimal,
    #[serde(rename = "turnover24h")]
    turnover_24h: Decimal,
}

pub fn decode_item(item: Value) -> Result<Option<NormalizedRecord>, DecodeError> {
    let Some(symbol) = symbol_field(&item, "symbol") else {
        return Ok(None);
    };
    let token = home_quote_token(&symbol, HOME_QUOTE);
    let ticker: BybitTicker = parse_body(item, &token)?;

    Ok(Some(NormalizedRecord {
        token,
        trade_price: ticker.last_price,
        trade_volume: ticker.volume_24h,
        change_rate: ticker.price_24h_pcnt,
        change_direction: ChangeDirection::from_rate(ticker.price_24h_pcnt),
        highest_price: ticker.high_price_24h,
        lowest_price: ticker.low_price_24h,
        opening_price: ticker.prev_price_24h,
        acc_trade_price_24h: ticker.turnover_24h,
    }))
}
