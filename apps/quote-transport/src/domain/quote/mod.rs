//! Quote Types
//!
//! Normalized quote records produced by both transport channels.
//!
//! A `Quote` is the single shape the rest of the system sees, whether it was
//! assembled from a streamed trade tick or from a polled REST snapshot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Quote Source
// =============================================================================

/// Channel a quote arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    /// Live trade tick from the streaming connection.
    Stream,
    /// One-shot initial REST backfill.
    Backfill,
    /// Periodic REST poll while the stream is down.
    FallbackPoll,
}

impl QuoteSource {
    /// Metric/log label for this source.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Backfill => "backfill",
            Self::FallbackPoll => "fallback_poll",
        }
    }
}

// =============================================================================
// Quote
// =============================================================================

/// A normalized market quote for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Ticker symbol.
    pub ticker: String,
    /// Last traded / current price.
    pub price: Decimal,
    /// Previous session close.
    pub previous_close: Option<Decimal>,
    /// Percent change versus previous close.
    pub change_percent: Option<Decimal>,
    /// Session open.
    pub open: Option<Decimal>,
    /// Session high.
    pub high: Option<Decimal>,
    /// Session low.
    pub low: Option<Decimal>,
    /// Traded volume (trade size for streamed ticks).
    pub volume: Option<Decimal>,
    /// Provider timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Create a quote carrying only a price and timestamp.
    #[must_use]
    pub fn new(ticker: impl Into<String>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            ticker: ticker.into(),
            price,
            previous_close: None,
            change_percent: None,
            open: None,
            high: None,
            low: None,
            volume: None,
            timestamp,
        }
    }

    /// Provider timestamp in Unix milliseconds.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Fill `change_percent` from a known previous close if it is missing.
    ///
    /// A zero previous close leaves the change unset.
    #[must_use]
    pub fn with_reference_close(mut self, previous_close: Decimal) -> Self {
        if self.previous_close.is_none() {
            self.previous_close = Some(previous_close);
        }
        if self.change_percent.is_none() {
            self.change_percent = percent_change(self.price, previous_close);
        }
        self
    }
}

/// Percent change of `price` against `reference`, or `None` for a zero reference.
#[must_use]
pub fn percent_change(price: Decimal, reference: Decimal) -> Option<Decimal> {
    if reference.is_zero() {
        return None;
    }
    (price - reference)
        .checked_div(reference)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map(|pct| pct.round_dp(4))
}

// =============================================================================
// Trade Tick
// =============================================================================

/// A single trade print parsed from the streaming wire.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeTick {
    /// Ticker symbol.
    pub symbol: String,
    /// Trade price.
    pub price: Decimal,
    /// Trade timestamp.
    pub timestamp: DateTime<Utc>,
    /// Trade size.
    pub volume: Option<Decimal>,
}

impl From<TradeTick> for Quote {
    fn from(tick: TradeTick) -> Self {
        Self {
            volume: tick.volume,
            ..Self::new(tick.symbol, tick.price, tick.timestamp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn percent_change_basic() {
        assert_eq!(percent_change(dec!(110), dec!(100)), Some(dec!(10)));
        assert_eq!(percent_change(dec!(95), dec!(100)), Some(dec!(-5)));
    }

    #[test]
    fn percent_change_zero_reference() {
        assert_eq!(percent_change(dec!(10), Decimal::ZERO), None);
    }

    #[test]
    fn reference_close_does_not_override_provider_change() {
        let mut quote = Quote::new("AAPL", dec!(110), Utc::now());
        quote.change_percent = Some(dec!(1.5));

        let quote = quote.with_reference_close(dec!(100));
        assert_eq!(quote.change_percent, Some(dec!(1.5)));
        assert_eq!(quote.previous_close, Some(dec!(100)));
    }

    #[test]
    fn tick_converts_to_quote() {
        let ts = Utc::now();
        let tick = TradeTick {
            symbol: "MSFT".to_string(),
            price: dec!(412.5),
            timestamp: ts,
            volume: Some(dec!(30)),
        };

        let quote = Quote::from(tick);
        assert_eq!(quote.ticker, "MSFT");
        assert_eq!(quote.volume, Some(dec!(30)));
        assert!(quote.previous_close.is_none());
        assert_eq!(quote.timestamp_millis(), ts.timestamp_millis());
    }
}
