//! Market State Types
//!
//! Exchange open/closed status and the per-ticker "dot state" decision.
//!
//! # Dot State Decision
//!
//! ```text
//! simulation mode ─────────────────────────────► Standby
//! no quote ever received ──────────────────────► Standby
//! exchange status known ───────────────────────► Open | Closed
//! last quote younger than staleness threshold ─► Open
//! otherwise ───────────────────────────────────► Standby
//! ```
//!
//! Missing data never produces `Closed`: only an authoritative exchange
//! status can.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exchange code used for plain (unsuffixed) tickers.
pub const DEFAULT_EXCHANGE: &str = "US";

/// Dot suffixes that mark a US share class (`BRK.B`) rather than an exchange.
const SHARE_CLASS_SUFFIXES: [&str; 3] = ["A", "B", "C"];

// =============================================================================
// Market Status
// =============================================================================

/// Authoritative open/closed status for one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatus {
    /// Exchange code (e.g. `US`, `L`, `TO`).
    pub exchange: String,
    /// Whether the exchange is currently open.
    pub is_open: bool,
    /// Provider session label (`regular`, `pre-market`, ...), if reported.
    pub session: Option<String>,
}

/// Exchange implied by a ticker symbol.
///
/// - `VOD.L` → `L`
/// - `AAPL` → `US`
/// - `BRK.B` → `US` (share class, not an exchange)
/// - `BINANCE:BTCUSDT` → `None` (venue-prefixed symbols have no exchange session)
#[must_use]
pub fn exchange_for_ticker(ticker: &str) -> Option<String> {
    let ticker = ticker.trim();
    if ticker.is_empty() || ticker.contains(':') {
        return None;
    }

    if let Some((base, suffix)) = ticker.rsplit_once('.')
        && !base.is_empty()
        && !suffix.is_empty()
    {
        let suffix = suffix.to_uppercase();
        if !SHARE_CLASS_SUFFIXES.contains(&suffix.as_str()) {
            return Some(suffix);
        }
    }
    Some(DEFAULT_EXCHANGE.to_string())
}

/// Distinct, sorted exchanges implied by a ticker list.
#[must_use]
pub fn exchanges_for_tickers<'a>(tickers: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut exchanges: Vec<String> = tickers
        .into_iter()
        .filter_map(|t| exchange_for_ticker(t))
        .collect();
    exchanges.sort();
    exchanges.dedup();
    exchanges
}

// =============================================================================
// Dot State
// =============================================================================

/// Three-valued market indicator for a ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DotState {
    /// Market believed open.
    Open,
    /// Exchange reported closed.
    Closed,
    /// Unknown / neutral.
    Standby,
}

/// Facts needed to decide a ticker's dot state.
#[derive(Debug, Clone, Copy)]
pub struct DotStateInputs {
    /// Caller-controlled simulation flag.
    pub simulation: bool,
    /// Arrival time of the most recent quote, if any was ever received.
    pub last_quote_at: Option<DateTime<Utc>>,
    /// Authoritative open flag for the ticker's exchange, if known.
    pub exchange_open: Option<bool>,
    /// Maximum quote age that still counts as evidence of an open market.
    pub staleness_threshold: Duration,
}

/// Decide the dot state for a ticker at `now`.
#[must_use]
pub fn infer_dot_state(inputs: &DotStateInputs, now: DateTime<Utc>) -> DotState {
    if inputs.simulation {
        return DotState::Standby;
    }

    let Some(last_quote_at) = inputs.last_quote_at else {
        return DotState::Standby;
    };

    if let Some(is_open) = inputs.exchange_open {
        return if is_open {
            DotState::Open
        } else {
            DotState::Closed
        };
    }

    let age = now.signed_duration_since(last_quote_at);
    match age.to_std() {
        Ok(age) if age < inputs.staleness_threshold => DotState::Open,
        // Future-dated arrival (clock skew) counts as fresh.
        Err(_) => DotState::Open,
        Ok(_) => DotState::Standby,
    }
}
