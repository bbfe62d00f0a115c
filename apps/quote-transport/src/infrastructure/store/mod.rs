//! In-Memory Quote Store
//!
//! Last-seen quote per ticker, with arrival time. Implements `QuoteStore` so
//! the orchestrator can tell which tickers already have data, and can be fed
//! straight from the event bus.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::events::{EventKind, TransportEvent};
use crate::application::ports::QuoteStore;
use crate::domain::quote::{Quote, QuoteSource};
use crate::infrastructure::broadcast::{EventBus, Subscription};

/// A stored quote with bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredQuote {
    /// Latest quote.
    pub quote: Quote,
    /// Channel it arrived through.
    pub source: QuoteSource,
    /// Wall-clock arrival time.
    pub received_at: DateTime<Utc>,
}

/// Thread-safe last-seen quote map.
#[derive(Debug, Default)]
pub struct MemoryQuoteStore {
    quotes: RwLock<HashMap<String, StoredQuote>>,
}

impl MemoryQuoteStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every published quote from `bus` into `store`.
    pub fn attach(store: &Arc<Self>, bus: &EventBus) -> Subscription {
        let store = Arc::clone(store);
        bus.subscribe(EventKind::Quote, move |event| {
            if let TransportEvent::Quote { quote, source } = event {
                store.record(quote, *source);
            }
        })
    }

    /// Latest stored entry for `ticker`.
    #[must_use]
    pub fn get(&self, ticker: &str) -> Option<StoredQuote> {
        self.quotes.read().get(ticker).cloned()
    }

    /// Number of tickers with data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    /// Check if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}

impl QuoteStore for MemoryQuoteStore {
    fn record(&self, quote: &Quote, source: QuoteSource) {
        self.quotes.write().insert(
            quote.ticker.clone(),
            StoredQuote {
                quote: quote.clone(),
                source,
                received_at: Utc::now(),
            },
        );
    }

    fn has_quote(&self, ticker: &str) -> bool {
        self.quotes.read().contains_key(ticker)
    }

    fn last_updated(&self, ticker: &str) -> Option<DateTime<Utc>> {
        self.quotes.read().get(ticker).map(|q| q.received_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn records_latest_quote() {
        let store = MemoryQuoteStore::new();
        let now = Utc::now();
        store.record(&Quote::new("AAPL", dec!(1), now), QuoteSource::Backfill);
        store.record(&Quote::new("AAPL", dec!(2), now), QuoteSource::Stream);

        let stored = store.get("AAPL").unwrap();
        assert_eq!(stored.quote.price, dec!(2));
        assert_eq!(stored.source, QuoteSource::Stream);
        assert!(store.has_quote("AAPL"));
        assert!(!store.has_quote("MSFT"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn attach_follows_bus() {
        let store = Arc::new(MemoryQuoteStore::new());
        let bus = EventBus::new();
        let subscription = MemoryQuoteStore::attach(&store, &bus);

        bus.emit(TransportEvent::Quote {
            quote: Quote::new("MSFT", dec!(410), Utc::now()),
            source: QuoteSource::Stream,
        });
        assert!(store.last_updated("MSFT").is_some());

        assert!(subscription.unsubscribe());
        bus.emit(TransportEvent::Quote {
            quote: Quote::new("TSLA", dec!(200), Utc::now()),
            source: QuoteSource::Stream,
        });
        assert!(!store.has_quote("TSLA"));
    }
}
