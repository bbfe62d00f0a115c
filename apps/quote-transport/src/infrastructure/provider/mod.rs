//! Quote Provider Adapters
//!
//! Streaming and REST access to the upstream quote provider.
//!
//! # Modules
//!
//! - `messages` / `codec`: wire types and the JSON stream codec
//! - `websocket`: `tokio-tungstenite` implementation of `StreamConnector`
//! - `stream`: resilient streaming connection (reconnect + heartbeat)
//! - `polling`: rate-limited REST client with throttle backoff
//! - `status`: periodic exchange status poller
//! - `reconnect`, `heartbeat`, `rate_limit`, `throttle`: timing policies

pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod polling;
pub mod rate_limit;
pub mod reconnect;
pub mod status;
pub mod stream;
pub mod throttle;
pub mod websocket;

pub use codec::{CodecError, JsonCodec};
pub use messages::{SymbolMatch, WireMessage};
pub use polling::{BatchSummary, PollingClient, PollingClientConfig, PollingError, RequestOptions};
pub use status::ExchangeStatusPoller;
pub use stream::{ConnectionState, StreamClientConfig, StreamEvent, StreamingConnection};
pub use websocket::TungsteniteConnector;
