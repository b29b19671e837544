//! Exchange provider implementations.
//!
//! Each provider turns one raw item of its exchange's ticker payload into a
//! [`NormalizedRecord`]. All providers share the [`ItemDecoder`] signature so
//! the decoder can pick one from a lookup table by exchange tag.

pub mod binance;
pub mod bithumb;
pub mod bybit;
pub mod upbit;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::DecodeError;
use crate::market::market_data::NormalizedRecord;

/// Decodes one raw item.
///
/// `Ok(None)` means the item carries no token and cannot be addressed;
/// `Err` means the item had a token but is otherwise unusable.
pub type ItemDecoder = fn(Value) -> Result<Option<NormalizedRecord>, DecodeError>;

/// Reads a non-empty string field used as the item's symbol.
pub(crate) fn symbol_field(item: &Value, field: &str) -> Option<String> {
    item.get(field)?
        .as_str()
        .filter(|symbol| !symbol.is_empty())
        .map(str::to_string)
}

/// Deserializes the item body, tagging failures with the token.
pub(crate) fn parse_body<T: DeserializeOwned>(item: Value, token: &str) -> Result<T, DecodeError> {
    serde_json::from_value(item).map_err(|e| DecodeError::InvalidRecord {
        token: token.to_string(),
        reason: e.to_string(),
    })
}

/// Token for a symbol: the bare base asset when the pair is quoted in the
/// exchange's home currency (`BTCUSDT` -> `BTC` with `USDT`), otherwise the
/// full symbol, so pairs on the same base in other quotes stay distinct.
pub(crate) fn home_quote_token(symbol: &str, home_quote: &str) -> String {
    symbol
        .strip_suffix(home_quote)
        .filter(|base| !base.is_empty())
        .unwrap_or(symbol)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_home_quote_token() {
        assert_eq!(home_quote_token("BTCUSDT", "USDT"), "BTC");
        assert_eq!(home_quote_token("BTCUSDC", "USDT"), "BTCUSDC");
        assert_eq!(home_quote_token("ETHBTC", "USDT"), "ETHBTC");
        assert_eq!(home_quote_token("ETH_KRW", "_KRW"), "ETH");
        assert_eq!(home_quote_token("ETH_BTC", "_KRW"), "ETH_BTC");
        assert_eq!(home_quote_token("USDT", "USDT"), "USDT");
    }

    #[test]
    fn test_symbol_field_rejects_empty_and_non_string() {
        assert_eq!(symbol_field(&json!({"s": "BTCUSDT"}), "s"), Some("BTCUSDT".to_string()));
        assert_eq!(symbol_field(&json!({"s": ""}), "s"), None);
        assert_eq!(symbol_field(&json!({"s": 42}), "s"), None);
        assert_eq!(symbol_field(&json!(["s"]), "s"), None);
    }
}
