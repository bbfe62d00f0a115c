//! Transport Events
//!
//! Everything the transport reports to its collaborators flows through
//! `TransportEvent`. Consumers pick the kinds they care about via `EventKind`.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::market::MarketStatus;
use crate::domain::quote::{Quote, QuoteSource};

// =============================================================================
// Error Codes
// =============================================================================

/// Classified error surfaced to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No credential and no proxy endpoint configured.
    NoCredential,
    /// Provider rejected the credential.
    AuthFailed,
    /// Streaming reconnect attempts exhausted.
    MaxRetriesExceeded,
    /// Network access is not allowed from this execution context.
    ForbiddenOrigin,
    /// Streaming transport failure.
    WsError,
}

impl ErrorCode {
    /// Wire/log name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoCredential => "NO_CREDENTIAL",
            Self::AuthFailed => "AUTH_FAILED",
            Self::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            Self::ForbiddenOrigin => "FORBIDDEN_ORIGIN",
            Self::WsError => "WS_ERROR",
        }
    }

    /// Whether the error will not clear up without operator action.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::WsError)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Events
// =============================================================================

/// Event published by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Transport started for these tickers.
    Started {
        /// Requested tickers.
        tickers: Vec<String>,
    },
    /// Transport fully stopped; no background activity remains.
    Stopped,
    /// Streaming channel opened.
    StreamConnected,
    /// Streaming channel lost.
    StreamDisconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// A normalized quote.
    Quote {
        /// The quote.
        quote: Quote,
        /// Channel it arrived through.
        source: QuoteSource,
    },
    /// Provider throttled REST requests.
    RateLimited {
        /// Wall-clock end of the cooldown.
        backoff_until: DateTime<Utc>,
        /// Cooldown length.
        backoff_delay: Duration,
    },
    /// Exchange open/closed status refreshed.
    MarketStatus(MarketStatus),
    /// Classified error.
    Error {
        /// Error class.
        code: ErrorCode,
        /// Detail message.
        message: String,
    },
}

impl TransportEvent {
    /// Shorthand for an error event.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Kind discriminator of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Started { .. } => EventKind::Started,
            Self::Stopped => EventKind::Stopped,
            Self::StreamConnected => EventKind::StreamConnected,
            Self::StreamDisconnected { .. } => EventKind::StreamDisconnected,
            Self::Quote { .. } => EventKind::Quote,
            Self::RateLimited { .. } => EventKind::RateLimited,
            Self::MarketStatus(_) => EventKind::MarketStatus,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

/// Event kind used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Match every event.
    All,
    /// `TransportEvent::Started`.
    Started,
    /// `TransportEvent::Stopped`.
    Stopped,
    /// `TransportEvent::StreamConnected`.
    StreamConnected,
    /// `TransportEvent::StreamDisconnected`.
    StreamDisconnected,
    /// `TransportEvent::Quote`.
    Quote,
    /// `TransportEvent::RateLimited`.
    RateLimited,
    /// `TransportEvent::MarketStatus`.
    MarketStatus,
    /// `TransportEvent::Error`.
    Error,
}

impl EventKind {
    /// Check whether `event` falls under this kind.
    #[must_use]
    pub fn matches(self, event: &TransportEvent) -> bool {
        self == Self::All || self == event.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ErrorCode::NoCredential, "NO_CREDENTIAL", true)]
    #[test_case(ErrorCode::AuthFailed, "AUTH_FAILED", true)]
    #[test_case(ErrorCode::MaxRetriesExceeded, "MAX_RETRIES_EXCEEDED", true)]
    #[test_case(ErrorCode::ForbiddenOrigin, "FORBIDDEN_ORIGIN", true)]
    #[test_case(ErrorCode::WsError, "WS_ERROR", false)]
    fn error_code_names(code: ErrorCode, name: &str, fatal: bool) {
        assert_eq!(code.as_str(), name);
        assert_eq!(code.to_string(), name);
        assert_eq!(code.is_fatal(), fatal);
    }

    #[test]
    fn kind_filtering() {
        let event = TransportEvent::StreamConnected;
        assert!(EventKind::All.matches(&event));
        assert!(EventKind::StreamConnected.matches(&event));
        assert!(!EventKind::Quote.matches(&event));
    }
}
