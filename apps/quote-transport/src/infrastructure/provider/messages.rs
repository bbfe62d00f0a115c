//! Provider Message Types
//!
//! Wire format types for the quote provider's streaming and REST APIs.
//!
//! # Streaming (JSON text frames)
//!
//! Outbound:
//! ```json
//! {"type": "subscribe", "symbol": "AAPL"}
//! {"type": "unsubscribe", "symbol": "AAPL"}
//! {"type": "ping"}
//! ```
//!
//! Inbound:
//! ```json
//! {"type": "ping"}
//! {"type": "trade", "data": [{"s": "AAPL", "p": 189.5, "t": 1700000000000, "v": 100}]}
//! ```
//!
//! # REST
//!
//! - `GET /quote?symbol=AAPL` → [`QuoteResponse`]
//! - `GET /stock/market-status?exchange=US` → [`MarketStatusResponse`]
//! - `GET /search?q=apple` → [`SearchResponse`]

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::MarketStatus;
use crate::domain::quote::{Quote, TradeTick};

// =============================================================================
// Streaming Messages
// =============================================================================

/// Streaming protocol message, tagged by its `type` field.
///
/// Any `type` not listed here fails to deserialize, so unknown traffic is
/// rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    /// Liveness probe (both directions).
    Ping,
    /// Liveness reply (both directions).
    Pong,
    /// Batch of trade prints.
    Trade {
        /// Prints in provider order.
        #[serde(default)]
        data: Vec<TradePrint>,
    },
    /// Provider-side error notice.
    Error {
        /// Error text.
        #[serde(default)]
        msg: String,
    },
    /// Start streaming a symbol.
    Subscribe {
        /// Symbol to stream.
        symbol: String,
    },
    /// Stop streaming a symbol.
    Unsubscribe {
        /// Symbol to drop.
        symbol: String,
    },
}

impl WireMessage {
    /// Build a subscribe request.
    #[must_use]
    pub fn subscribe(symbol: impl Into<String>) -> Self {
        Self::Subscribe {
            symbol: symbol.into(),
        }
    }

    /// Build an unsubscribe request.
    #[must_use]
    pub fn unsubscribe(symbol: impl Into<String>) -> Self {
        Self::Unsubscribe {
            symbol: symbol.into(),
        }
    }

    /// Whether this variant is only ever sent by the client.
    #[must_use]
    pub const fn is_client_only(&self) -> bool {
        matches!(self, Self::Subscribe { .. } | Self::Unsubscribe { .. })
    }
}

/// One trade print inside a `trade` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradePrint {
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Price.
    #[serde(rename = "p")]
    pub price: Decimal,

    /// Unix milliseconds.
    #[serde(rename = "t")]
    pub timestamp_ms: i64,

    /// Size.
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,

    /// Trade conditions.
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<String>>,
}

impl TradePrint {
    /// Convert to a domain tick. Returns `None` for an unrepresentable timestamp.
    #[must_use]
    pub fn to_tick(&self) -> Option<TradeTick> {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms)?;
        Some(TradeTick {
            symbol: self.symbol.clone(),
            price: self.price,
            timestamp,
            volume: self.volume,
        })
    }
}

// =============================================================================
// REST: Quote
// =============================================================================

/// Quote snapshot response.
///
/// # Wire Format (JSON)
/// ```json
/// {"c": 189.5, "d": 1.2, "dp": 0.64, "h": 190.1, "l": 187.9, "o": 188.0, "pc": 188.3, "t": 1700000000}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteResponse {
    /// Current price.
    #[serde(rename = "c", default)]
    pub current: Option<Decimal>,

    /// Absolute change.
    #[serde(rename = "d", default)]
    pub change: Option<Decimal>,

    /// Percent change.
    #[serde(rename = "dp", default)]
    pub change_percent: Option<Decimal>,

    /// Session high.
    #[serde(rename = "h", default)]
    pub high: Option<Decimal>,

    /// Session low.
    #[serde(rename = "l", default)]
    pub low: Option<Decimal>,

    /// Session open.
    #[serde(rename = "o", default)]
    pub open: Option<Decimal>,

    /// Previous close.
    #[serde(rename = "pc", default)]
    pub previous_close: Option<Decimal>,

    /// Unix seconds.
    #[serde(rename = "t", default)]
    pub timestamp: Option<i64>,
}

impl QuoteResponse {
    /// Whether the provider answered "no data" (zero price at epoch zero).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.unwrap_or_default().is_zero() && self.timestamp.unwrap_or_default() == 0
    }

    /// Convert to a domain quote. Returns `None` for an empty snapshot.
    #[must_use]
    pub fn into_quote(self, ticker: &str) -> Option<Quote> {
        if self.is_empty() {
            return None;
        }
        let price = self.current?;
        let timestamp = self
            .timestamp
            .filter(|t| *t > 0)
            .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
            .unwrap_or_else(Utc::now);

        let quote = Quote {
            previous_close: self.previous_close.filter(|pc| !pc.is_zero()),
            change_percent: self.change_percent,
            open: self.open,
            high: self.high,
            low: self.low,
            ..Quote::new(ticker, price, timestamp)
        };

        Some(match quote.previous_close {
            Some(pc) => quote.with_reference_close(pc),
            None => quote,
        })
    }
}

// =============================================================================
// REST: Market Status
// =============================================================================

/// Market status response. Providers disagree on field naming, so all three
/// shapes are accepted.
///
/// # Wire Format (JSON)
/// ```json
/// {"exchange": "US", "isOpen": false, "session": "pre-market", "timezone": "America/New_York"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatusResponse {
    /// Exchange code echoed back.
    #[serde(default)]
    pub exchange: Option<String>,

    /// Explicit open flag.
    #[serde(rename = "isOpen", default)]
    pub is_open: Option<bool>,

    /// Boolean or `"open"`/`"closed"` string.
    #[serde(default)]
    pub market: Option<serde_json::Value>,

    /// Session name (`"regular"`, `"pre-market"`, ...).
    #[serde(default)]
    pub session: Option<String>,
}

impl MarketStatusResponse {
    /// Normalize to an open flag.
    ///
    /// `isOpen` wins, then `market`, then `session`. `None` if no field is usable.
    #[must_use]
    pub fn resolve_open(&self) -> Option<bool> {
        if let Some(open) = self.is_open {
            return Some(open);
        }

        match &self.market {
            Some(serde_json::Value::Bool(open)) => return Some(*open),
            Some(serde_json::Value::String(s)) => return Some(s.eq_ignore_ascii_case("open")),
            _ => {}
        }

        self.session.as_deref().map(|s| {
            let s = s.to_ascii_lowercase();
            s == "regular" || s == "open"
        })
    }

    /// Convert to a domain status for `exchange`. `None` if unresolvable.
    #[must_use]
    pub fn into_status(self, exchange: &str) -> Option<MarketStatus> {
        let is_open = self.resolve_open()?;
        Some(MarketStatus {
            exchange: exchange.to_string(),
            is_open,
            session: self.session,
        })
    }
}

// =============================================================================
// REST: Symbol Search
// =============================================================================

/// Symbol search response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Number of matches reported by the provider.
    #[serde(default)]
    pub count: usize,

    /// Matches.
    #[serde(default)]
    pub result: Vec<SymbolMatch>,
}

/// A single symbol search match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMatch {
    /// Company or instrument name.
    #[serde(default)]
    pub description: String,

    /// Display form of the symbol.
    #[serde(rename = "displaySymbol", default)]
    pub display_symbol: String,

    /// Symbol used in API calls.
    pub symbol: String,

    /// Security type (e.g. `"Common Stock"`).
    #[serde(rename = "type", default)]
    pub security_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test]
    fn quote_response_to_quote() {
        let json = r#"{"c":110,"d":10,"dp":10,"h":111,"l":99,"o":100,"pc":100,"t":1700000000}"#;
        let resp: QuoteResponse = serde_json::from_str(json).unwrap();
        let quote = resp.into_quote("AAPL").unwrap();

        assert_eq!(quote.ticker, "AAPL");
        assert_eq!(quote.price, dec!(110));
        assert_eq!(quote.previous_close, Some(dec!(100)));
        assert_eq!(quote.change_percent, Some(dec!(10)));
        assert_eq!(quote.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn quote_response_derives_missing_change() {
        let json = r#"{"c":105,"pc":100,"t":1700000000}"#;
        let resp: QuoteResponse = serde_json::from_str(json).unwrap();
        let quote = resp.into_quote("MSFT").unwrap();
        assert_eq!(quote.change_percent, Some(dec!(5)));
    }

    #[test]
    fn zero_quote_is_empty() {
        let json = r#"{"c":0,"d":null,"dp":null,"h":0,"l":0,"o":0,"pc":0,"t":0}"#;
        let resp: QuoteResponse = serde_json::from_str(json).unwrap();
        assert!(resp.is_empty());
        assert!(resp.into_quote("ZZZZ").is_none());
    }

    #[test_case(r#"{"isOpen":true,"market":false}"#, Some(true); "is_open wins")]
    #[test_case(r#"{"market":"open"}"#, Some(true); "market string")]
    #[test_case(r#"{"market":false,"session":"regular"}"#, Some(false); "market bool before session")]
    #[test_case(r#"{"session":"regular"}"#, Some(true); "regular session")]
    #[test_case(r#"{"session":"pre-market"}"#, Some(false); "pre market session")]
    #[test_case(r#"{"exchange":"US"}"#, None; "no usable field")]
    fn market_status_resolution(json: &str, expected: Option<bool>) {
        let resp: MarketStatusResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.resolve_open(), expected);
    }

    #[test]
    fn search_response_parsing() {
        let json = r#"{"count":1,"result":[{"description":"APPLE INC","displaySymbol":"AAPL","symbol":"AAPL","type":"Common Stock"}]}"#;
        let resp: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.count, 1);
        assert_eq!(resp.result[0].display_symbol, "AAPL");
        assert_eq!(resp.result[0].security_type, "Common Stock");
    }

    #[test]
    fn trade_print_to_tick() {
        let print = TradePrint {
            symbol: "AAPL".into(),
            price: dec!(189.5),
            timestamp_ms: 1_700_000_000_123,
            volume: Some(dec!(100)),
            conditions: None,
        };
        let tick = print.to_tick().unwrap();
        assert_eq!(tick.timestamp.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(tick.volume, Some(dec!(100)));
    }
}
