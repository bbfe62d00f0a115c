//! Configuration Module
//!
//! Configuration loading for the quote transport.

mod settings;

pub use settings::{
    ConfigError, Credential, DEFAULT_REST_BASE_URL, DEFAULT_STREAM_URL, Endpoints,
    OrchestratorSettings, PollingSettings, Strategy, StreamSettings, TransportConfig,
    parse_ticker_list,
};
