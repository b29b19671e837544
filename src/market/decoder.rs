//! Decoding of multiplexed ticker payloads.
//!
//! A payload is a JSON object keyed by exchange tag, each value holding that
//! exchange's raw items:
//!
//! ```json
//! {"upbit": [{"code": "KRW-BTC", ...}], "binance": [{"s": "BTCUSDT", ...}]}
//! ```
//!
//! Each tag yields its own [`MarketDataMap`]. Structural problems fail the
//! whole payload; a bad item only costs that item.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::market::exchange::MarketId;
use crate::market::market_data::MarketDataMap;

/// Decodes one payload received on `owner`'s connection.
///
/// `owner` is only used for log context: the payload may carry sections for
/// other markets and those are returned under their own tag.
pub fn decode(payload: &str, owner: MarketId) -> Result<Vec<(MarketId, MarketDataMap)>, DecodeError> {
    let Value::Object(sections) = serde_json::from_str::<Value>(payload)? else {
        return Err(DecodeError::NotAnObject);
    };

    let mut decoded = Vec::with_capacity(sections.len());
    for (tag, section) in sections {
        let Some(market) = MarketId::from_tag(&tag) else {
            debug!(market = %owner, tag = %tag, "ignoring unknown exchange tag");
            continue;
        };
        let Value::Array(items) = section else {
            return Err(DecodeError::NotAnArray { tag: market });
        };
        decoded.push((market, decode_items(market, items)));
    }

    Ok(decoded)
}

/// Decodes one exchange's items into a map keyed by token.
pub fn decode_items(market: MarketId, items: Vec<Value>) -> MarketDataMap {
    let decode_item = market.decoder();
    let mut records = MarketDataMap::with_capacity(items.len());

    for item in items {
        match decode_item(item) {
            Ok(Some(record)) => {
                records.insert(record.token.clone(), record);
            }
            Ok(None) => {}
            Err(e) => warn!(market = %market, error = %e, "dropping invalid record"),
        }
    }

    records
}
