//! Application Layer - Use cases, events and port definitions.
//!
//! The orchestrator lives here, together with the events it publishes and
//! the ports its adapters implement.

/// Events published to transport observers.
pub mod events;

/// Port interfaces for the quote store and streaming connector.
pub mod ports;

/// Application services.
pub mod services;
