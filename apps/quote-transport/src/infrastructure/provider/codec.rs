//! Stream Codec Module
//!
//! JSON encoding and decoding for the streaming protocol.
//!
//! Frames are parsed exactly once, here, into a [`WireMessage`]. Anything
//! that is not valid JSON, carries an unknown `type`, or is a client-only
//! message arriving from the server is rejected with a [`CodecError`].

use super::messages::WireMessage;
use crate::domain::quote::TradeTick;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Message type not accepted in this direction.
    #[error("unexpected message type: {0}")]
    UnexpectedMessageType(String),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the streaming connection.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object with a known
    /// server-side `type`.
    pub fn decode(&self, text: &str) -> Result<WireMessage, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        }

        let message: WireMessage = serde_json::from_str(trimmed)?;
        if message.is_client_only() {
            return Err(CodecError::UnexpectedMessageType(
                Self::type_name(&message).to_string(),
            ));
        }
        Ok(message)
    }

    /// Encode an outbound message.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, message: &WireMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }

    /// Flatten a `trade` message into ticks in wire order.
    ///
    /// Prints with an unrepresentable timestamp are dropped.
    #[must_use]
    pub fn trade_ticks(message: &WireMessage) -> Vec<TradeTick> {
        match message {
            WireMessage::Trade { data } => data
                .iter()
                .filter_map(|print| {
                    let tick = print.to_tick();
                    if tick.is_none() {
                        tracing::trace!(symbol = %print.symbol, ts = print.timestamp_ms, "Dropping print with bad timestamp");
                    }
                    tick
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    const fn type_name(message: &WireMessage) -> &'static str {
        match message {
            WireMessage::Ping => "ping",
            WireMessage::Pong => "pong",
            WireMessage::Trade { .. } => "trade",
            WireMessage::Error { .. } => "error",
            WireMessage::Subscribe { .. } => "subscribe",
            WireMessage::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test]
    fn decode_ping() {
        let codec = JsonCodec::new();
        assert_eq!(codec.decode(r#"{"type":"ping"}"#).unwrap(), WireMessage::Ping);
    }

    #[test]
    fn decode_trade_keeps_wire_order() {
        let codec = JsonCodec::new();
        let json = r#"{"type":"trade","data":[
            {"s":"MSFT","p":410.1,"t":1700000000000,"v":5},
            {"s":"AAPL","p":189.5,"t":1700000000001,"v":100},
            {"s":"MSFT","p":410.2,"t":1700000000002}
        ]}"#;

        let message = codec.decode(json).unwrap();
        let ticks = JsonCodec::trade_ticks(&message);

        let symbols: Vec<_> = ticks.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["MSFT", "AAPL", "MSFT"]);
        assert_eq!(ticks[1].price, dec!(189.5));
        assert_eq!(ticks[2].volume, None);
    }

    #[test]
    fn decode_trade_without_data() {
        let codec = JsonCodec::new();
        let message = codec.decode(r#"{"type":"trade"}"#).unwrap();
        assert!(JsonCodec::trade_ticks(&message).is_empty());
    }

    #[test_case(r#"{"type":"news","data":[]}"#; "unknown type")]
    #[test_case(r#"{"data":[]}"#; "missing type")]
    #[test_case(r#"[{"type":"ping"}]"#; "array frame")]
    #[test_case("not json"; "garbage")]
    #[test_case(r#"{"type":"subscribe","symbol":"AAPL"}"#; "client only type")]
    fn decode_rejects(frame: &str) {
        assert!(JsonCodec::new().decode(frame).is_err());
    }

    #[test]
    fn encode_outbound() {
        let codec = JsonCodec::new();
        assert_eq!(
            codec.encode(&WireMessage::subscribe("AAPL")).unwrap(),
            r#"{"type":"subscribe","symbol":"AAPL"}"#
        );
        assert_eq!(
            codec.encode(&WireMessage::unsubscribe("AAPL")).unwrap(),
            r#"{"type":"unsubscribe","symbol":"AAPL"}"#
        );
        assert_eq!(codec.encode(&WireMessage::Ping).unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(codec.encode(&WireMessage::Pong).unwrap(), r#"{"type":"pong"}"#);
    }
}
