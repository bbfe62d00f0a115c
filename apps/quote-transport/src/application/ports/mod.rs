//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamConnector`: opens a duplex text channel to the streaming provider
//! - `QuoteStore`: read-only view of which tickers already have data

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{Sink, Stream};

use crate::domain::quote::{Quote, QuoteSource};

// =============================================================================
// Quote Store
// =============================================================================

/// Last-seen quote bookkeeping consulted by the orchestrator.
///
/// The transport never merges quotes itself; it only asks the store whether a
/// ticker has data and when it last arrived.
pub trait QuoteStore: Send + Sync {
    /// Record a quote as it is published.
    fn record(&self, quote: &Quote, source: QuoteSource);

    /// Check if any quote was ever recorded for `ticker`.
    fn has_quote(&self, ticker: &str) -> bool;

    /// Wall-clock arrival time of the most recent quote for `ticker`.
    fn last_updated(&self, ticker: &str) -> Option<DateTime<Utc>>;
}

// =============================================================================
// Stream Connector
// =============================================================================

/// Errors surfaced by a streaming channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// Opening the channel failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Opening the channel did not finish in time.
    #[error("connect timed out")]
    ConnectTimeout,

    /// Provider rejected the credential during the handshake.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// Transport-level failure on an open channel.
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer closed the channel.
    #[error("connection closed")]
    Closed,

    /// No inbound traffic within the liveness window.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
}

/// Outbound half of a streaming channel carrying text frames.
pub type WireSink = Pin<Box<dyn Sink<String, Error = StreamError> + Send>>;

/// Inbound half of a streaming channel yielding text frames.
pub type WireSource = Pin<Box<dyn Stream<Item = Result<String, StreamError>> + Send>>;

/// Factory for streaming channels.
///
/// Implemented by the WebSocket adapter in production and by in-memory fakes
/// in tests.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a channel to `url`.
    async fn connect(&self, url: &str) -> Result<(WireSink, WireSource), StreamError>;
}
