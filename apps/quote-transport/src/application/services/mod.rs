//! Application Services
//!
//! - `TransportOrchestrator`: strategy selection, backfill, failover and
//!   dot state for a set of tracked tickers

pub mod orchestrator;

pub use orchestrator::{TransportError, TransportOrchestrator};
