//! Transport Configuration Settings
//!
//! Configuration types for the quote transport, loaded from environment variables.

use std::time::Duration;

/// Default REST endpoint of the quote provider.
pub const DEFAULT_REST_BASE_URL: &str = "https://finnhub.io/api/v1";

/// Default streaming endpoint of the quote provider.
pub const DEFAULT_STREAM_URL: &str = "wss://ws.finnhub.io";

/// Channel strategy used by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Stream live ticks, backfill and fail over to polling.
    #[default]
    StreamPreferred,
    /// Stream only; polling is used for exchange status alone.
    StreamOnly,
    /// Never open the stream; poll periodically.
    PollOnly,
}

impl Strategy {
    /// Parse strategy from string, falling back to the default.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "stream-only" => Self::StreamOnly,
            "poll-only" => Self::PollOnly,
            _ => Self::StreamPreferred,
        }
    }

    /// Get the strategy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StreamPreferred => "stream-preferred",
            Self::StreamOnly => "stream-only",
            Self::PollOnly => "poll-only",
        }
    }

    /// Whether this strategy opens the streaming connection.
    #[must_use]
    pub const fn uses_stream(&self) -> bool {
        matches!(self, Self::StreamPreferred | Self::StreamOnly)
    }

    /// Whether this strategy runs the initial REST backfill.
    #[must_use]
    pub const fn uses_backfill(&self) -> bool {
        matches!(self, Self::StreamPreferred | Self::PollOnly)
    }
}

/// Provider API credential.
///
/// May be empty when a proxy endpoint injects it on the way out.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Create a credential.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    /// Get the raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if no token is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("Credential(<empty>)")
        } else {
            f.write_str("Credential([REDACTED])")
        }
    }
}

/// REST and streaming endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Base URL for REST requests (no trailing slash).
    pub rest_base_url: String,
    /// WebSocket URL for streaming.
    pub stream_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
            stream_url: DEFAULT_STREAM_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Create endpoints, normalizing the REST base.
    #[must_use]
    pub fn new(rest_base_url: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            rest_base_url: rest_base_url.into().trim_end_matches('/').to_string(),
            stream_url: stream_url.into(),
        }
    }

    /// Whether either endpoint was redirected away from the provider (e.g. to
    /// a proxy that injects the credential itself).
    #[must_use]
    pub fn is_proxied(&self) -> bool {
        let defaults = Self::default();
        self.rest_base_url != defaults.rest_base_url || self.stream_url != defaults.stream_url
    }
}

/// Streaming connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Heartbeat ping interval; the liveness timeout is twice this.
    pub heartbeat_interval: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier.
    pub reconnect_delay_multiplier: f64,
    /// Reconnection delay jitter as a fraction (0.1 = ±10%, 0 = off).
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Timeout for a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 10,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// REST polling settings.
#[derive(Debug, Clone)]
pub struct PollingSettings {
    /// Requests allowed per rate-limit window.
    pub rate_limit_max_requests: u32,
    /// Rate-limit window length.
    pub rate_limit_window: Duration,
    /// Cooldown applied on the first 429.
    pub backoff_initial: Duration,
    /// Cooldown added on each further 429.
    pub backoff_increment: Duration,
    /// Cooldown ceiling.
    pub backoff_max: Duration,
    /// Tickers fetched concurrently per batch group.
    pub batch_size: usize,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            rate_limit_max_requests: 60,
            rate_limit_window: Duration::from_secs(60),
            backoff_initial: Duration::from_secs(30),
            backoff_increment: Duration::from_secs(30),
            backoff_max: Duration::from_secs(120),
            batch_size: 5,
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Orchestrator timing settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Wait after a stream drop before polling takes over.
    pub failover_grace: Duration,
    /// Interval of the fallback poll.
    pub fallback_interval: Duration,
    /// Interval of the exchange status poll.
    pub status_interval: Duration,
    /// Age after which a quote no longer implies an open market.
    pub staleness_threshold: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            failover_grace: Duration::from_secs(5),
            fallback_interval: Duration::from_secs(30),
            status_interval: Duration::from_secs(60),
            staleness_threshold: Duration::from_secs(300),
        }
    }
}

/// Complete transport configuration.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    /// Provider credential.
    pub credential: Credential,
    /// Provider endpoints.
    pub endpoints: Endpoints,
    /// Tickers to start with.
    pub tickers: Vec<String>,
    /// Channel strategy.
    pub strategy: Strategy,
    /// Simulation mode: dot states are always standby.
    pub simulation: bool,
    /// Whether this process may reach the network at all.
    pub network_allowed: bool,
    /// Streaming settings.
    pub stream: StreamSettings,
    /// Polling settings.
    pub polling: PollingSettings,
    /// Orchestrator settings.
    pub orchestrator: OrchestratorSettings,
}

impl TransportConfig {
    /// Configuration with defaults for everything but credential and endpoints.
    #[must_use]
    pub fn new(credential: Credential, endpoints: Endpoints) -> Self {
        Self {
            credential,
            endpoints,
            network_allowed: true,
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but malformed in a way that
    /// cannot fall back to a default (empty endpoint URLs).
    pub fn from_env() -> Result<Self, ConfigError> {
        let credential = Credential::new(std::env::var("QUOTE_API_KEY").unwrap_or_default());

        let rest_base_url = parse_env_url("QUOTE_REST_BASE_URL", DEFAULT_REST_BASE_URL)?;
        let stream_url = parse_env_url("QUOTE_STREAM_URL", DEFAULT_STREAM_URL)?;

        let tickers = std::env::var("QUOTE_TICKERS")
            .map(|s| parse_ticker_list(&s))
            .unwrap_or_default();

        let strategy = std::env::var("QUOTE_STRATEGY")
            .map(|s| Strategy::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            heartbeat_interval: parse_env_duration_secs(
                "QUOTE_HEARTBEAT_INTERVAL_SECS",
                stream_defaults.heartbeat_interval,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "QUOTE_RECONNECT_DELAY_INITIAL_MS",
                stream_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "QUOTE_RECONNECT_DELAY_MAX_SECS",
                stream_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "QUOTE_RECONNECT_DELAY_MULTIPLIER",
                stream_defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: parse_env_f64("QUOTE_RECONNECT_JITTER", stream_defaults.reconnect_jitter)
                .clamp(0.0, 1.0),
            max_reconnect_attempts: parse_env_u32(
                "QUOTE_MAX_RECONNECT_ATTEMPTS",
                stream_defaults.max_reconnect_attempts,
            ),
            connect_timeout: parse_env_duration_secs(
                "QUOTE_CONNECT_TIMEOUT_SECS",
                stream_defaults.connect_timeout,
            ),
        };

        let polling_defaults = PollingSettings::default();
        let polling = PollingSettings {
            rate_limit_max_requests: parse_env_u32(
                "QUOTE_RATE_LIMIT_MAX_REQUESTS",
                polling_defaults.rate_limit_max_requests,
            ),
            rate_limit_window: parse_env_duration_secs(
                "QUOTE_RATE_LIMIT_WINDOW_SECS",
                polling_defaults.rate_limit_window,
            ),
            backoff_initial: parse_env_duration_secs(
                "QUOTE_BACKOFF_INITIAL_SECS",
                polling_defaults.backoff_initial,
            ),
            backoff_increment: parse_env_duration_secs(
                "QUOTE_BACKOFF_INCREMENT_SECS",
                polling_defaults.backoff_increment,
            ),
            backoff_max: parse_env_duration_secs("QUOTE_BACKOFF_MAX_SECS", polling_defaults.backoff_max),
            batch_size: parse_env_usize("QUOTE_BATCH_SIZE", polling_defaults.batch_size).max(1),
            request_timeout: parse_env_duration_secs(
                "QUOTE_REQUEST_TIMEOUT_SECS",
                polling_defaults.request_timeout,
            ),
        };

        let orchestrator_defaults = OrchestratorSettings::default();
        let orchestrator = OrchestratorSettings {
            failover_grace: parse_env_duration_secs(
                "QUOTE_FAILOVER_GRACE_SECS",
                orchestrator_defaults.failover_grace,
            ),
            fallback_interval: parse_env_duration_secs(
                "QUOTE_FALLBACK_INTERVAL_SECS",
                orchestrator_defaults.fallback_interval,
            ),
            status_interval: parse_env_duration_secs(
                "QUOTE_STATUS_INTERVAL_SECS",
                orchestrator_defaults.status_interval,
            ),
            staleness_threshold: parse_env_duration_secs(
                "QUOTE_STALENESS_SECS",
                orchestrator_defaults.staleness_threshold,
            ),
        };

        Ok(Self {
            credential,
            endpoints: Endpoints::new(rest_base_url, stream_url),
            tickers,
            strategy,
            simulation: parse_env_bool("QUOTE_SIMULATION", false),
            network_allowed: parse_env_bool("QUOTE_NETWORK_ALLOWED", true),
            stream,
            polling,
            orchestrator,
        })
    }

    /// Whether REST or streaming calls can authenticate at all.
    #[must_use]
    pub fn has_access(&self) -> bool {
        !self.credential.is_empty() || self.endpoints.is_proxied()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

/// Split a comma/whitespace separated ticker list, uppercased and deduplicated.
#[must_use]
pub fn parse_ticker_list(raw: &str) -> Vec<String> {
    let mut tickers: Vec<String> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_uppercase)
        .collect();
    tickers.sort();
    tickers.dedup();
    tickers
}

fn parse_env_url(key: &str, default: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
        Ok(v) => Ok(v.trim().to_string()),
        Err(_) => Ok(default.to_string()),
    }
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
