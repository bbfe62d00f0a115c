//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Quote provider adapters (WebSocket stream, REST polling, timing policies).
pub mod provider;

/// Event bus for transport events.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// In-memory quote store.
pub mod store;

/// OpenTelemetry tracing integration.
pub mod telemetry;
