//! Prometheus Metrics Module
//!
//! Application metrics recorded through the `metrics` facade.
//!
//! # Metrics
//!
//! - `quote_transport_quotes_total{source}`: quotes published per channel
//! - `quote_transport_requests_total{kind}`: REST requests issued
//! - `quote_transport_rate_limited_total`: 429 responses
//! - `quote_transport_reconnects_total`: scheduled stream reconnects
//! - `quote_transport_stream_connected`: 1 while the stream is open
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`],
//! which only the binary does.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::quote::QuoteSource;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, or return the existing handle.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "quote_transport_quotes_total",
        "Quotes published, by source channel"
    );
    describe_counter!(
        "quote_transport_requests_total",
        "REST requests issued to the provider, by kind"
    );
    describe_counter!(
        "quote_transport_rate_limited_total",
        "Provider 429 responses"
    );
    describe_counter!(
        "quote_transport_reconnects_total",
        "Scheduled streaming reconnect attempts"
    );
    describe_gauge!(
        "quote_transport_stream_connected",
        "1 while the streaming connection is open"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for REST request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Quote snapshot.
    Quote,
    /// Exchange status.
    MarketStatus,
    /// Symbol search.
    Search,
}

impl RequestKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::MarketStatus => "market_status",
            Self::Search => "search",
        }
    }
}

/// Record a published quote.
pub fn record_quote(source: QuoteSource) {
    counter!("quote_transport_quotes_total", "source" => source.as_str()).increment(1);
}

/// Record a REST request leaving the client.
pub fn record_request(kind: RequestKind) {
    counter!("quote_transport_requests_total", "kind" => kind.as_str()).increment(1);
}

/// Record a 429 response.
pub fn record_rate_limited() {
    counter!("quote_transport_rate_limited_total").increment(1);
}

/// Record a scheduled reconnect.
pub fn record_reconnect() {
    counter!("quote_transport_reconnects_total").increment(1);
}

/// Update the stream connection gauge.
pub fn set_stream_connected(connected: bool) {
    gauge!("quote_transport_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

// =============================================================================
// Tests
// =============================================================================
