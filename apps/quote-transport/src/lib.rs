#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Transport - Resilient Market Quote Acquisition
//!
//! Keeps a set of tracked tickers supplied with fresh quotes. Live trades
//! arrive over a WebSocket stream; a rate-limited REST client backfills
//! missing data on start and takes over with periodic polling whenever the
//! stream stays down past a grace period.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and decisions
//!   - `quote`: Normalized quotes and streamed trade ticks
//!   - `market`: Exchange status and the per-ticker dot state
//!   - `subscription`: Active/pending subscription tracking
//!   - `backfill`: Missing-data-first fetch ordering
//!
//! - **Application**: Use cases and port definitions
//!   - `events`: Events published to observers
//!   - `ports`: Quote store and stream connector interfaces
//!   - `services`: The transport orchestrator
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `provider`: Streaming connection, polling client, status poller
//!   - `broadcast`: Observer event bus
//!   - `config`: Environment-driven configuration
//!   - `store`: In-memory quote store
//!   - `metrics` / `telemetry`: Prometheus and tracing setup
//!
//! # Data Flow
//!
//! ```text
//! Provider WS ──► StreamingConnection ──┐
//!                                       ├──► Orchestrator ──► EventBus ──► Observers
//! Provider REST ──► PollingClient ──────┘         │
//!                 (backfill / fallback)           └──► ExchangeStatusPoller
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Quote types and decisions with no I/O.
pub mod domain;

/// Application layer - Orchestration, events and ports.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{DotState, MarketStatus};
pub use domain::quote::{Quote, QuoteSource, TradeTick};
pub use domain::subscription::{SubscriptionSet, Symbol};

// Application
pub use application::events::{ErrorCode, EventKind, TransportEvent};
pub use application::ports::{QuoteStore, StreamConnector, StreamError};
pub use application::services::{TransportError, TransportOrchestrator};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, Credential, Endpoints, OrchestratorSettings, PollingSettings, Strategy,
    StreamSettings, TransportConfig,
};

// Adapters
pub use infrastructure::broadcast::{EventBus, Subscription};
pub use infrastructure::provider::{
    PollingClient, PollingError, StreamingConnection, TungsteniteConnector,
};
pub use infrastructure::store::MemoryQuoteStore;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
