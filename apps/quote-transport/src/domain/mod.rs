//! Domain Layer - Core quote transport types and decisions.
//!
//! This layer contains the pure data types and decision functions of the
//! transport. Nothing here performs I/O or owns a timer.

/// Backfill ordering (missing-data-first priority queue).
pub mod backfill;

/// Exchange status and the per-ticker dot state decision.
pub mod market;

/// Normalized quote records and streamed trade ticks.
pub mod quote;

/// Active/pending subscription tracking.
pub mod subscription;
