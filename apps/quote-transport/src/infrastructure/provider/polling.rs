//! REST Polling Client
//!
//! Rate-limited, throttle-aware access to the provider's REST API.
//!
//! # Request pipeline
//!
//! 1. Availability gate: fail fast, without touching the network, while
//!    backing off, when network access is forbidden, when there is no way to
//!    authenticate, or after a latched auth failure.
//! 2. Fixed-window rate limiter: wait (cancellably) for a slot.
//! 3. HTTP GET with the credential header and a per-request timeout.
//! 4. Response classification: 429 feeds the linear throttle backoff,
//!    401/403 latch the client unless the call was a warmup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::messages::{MarketStatusResponse, QuoteResponse, SearchResponse, SymbolMatch};
use super::rate_limit::{RateLimitConfig, RateLimitWindow, RateLimiter};
use super::throttle::{BackoffState, ThrottleBackoff, ThrottleConfig};
use crate::application::events::ErrorCode;
use crate::domain::market::MarketStatus;
use crate::domain::quote::Quote;
use crate::infrastructure::config::{Credential, PollingSettings, TransportConfig};
use crate::infrastructure::metrics::{self, RequestKind};

/// Header carrying the provider credential.
pub const TOKEN_HEADER: &str = "X-Finnhub-Token";

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by the polling client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollingError {
    /// Inside a throttle cooldown; no request was made.
    #[error("backing off for another {}ms", remaining.as_millis())]
    BackingOff {
        /// Time left in the cooldown.
        remaining: Duration,
    },

    /// Network access is not allowed from this context.
    #[error("network access forbidden from this origin")]
    ForbiddenOrigin,

    /// No credential and no proxy endpoint.
    #[error("no credential configured")]
    NoCredential,

    /// Provider rejected the credential.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Provider answered 429.
    #[error("rate limited until {backoff_until}")]
    RateLimited {
        /// Wall-clock end of the cooldown.
        backoff_until: DateTime<Utc>,
        /// Cooldown length.
        backoff_delay: Duration,
    },

    /// Provider has no data for the ticker.
    #[error("no quote data for {0}")]
    NoData(String),

    /// Status response carried none of the recognized fields.
    #[error("unrecognized market status for {0}")]
    UnresolvedStatus(String),

    /// Other non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Transport failure or timeout.
    #[error("network error: {0}")]
    Network(String),

    /// Body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// Caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
}

impl PollingError {
    /// Consumer-facing error class, if this error has one.
    #[must_use]
    pub const fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::NoCredential => Some(ErrorCode::NoCredential),
            Self::ForbiddenOrigin => Some(ErrorCode::ForbiddenOrigin),
            Self::AuthenticationFailed(_) => Some(ErrorCode::AuthFailed),
            _ => None,
        }
    }

    /// Whether the request was refused before reaching the network.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::BackingOff { .. }
                | Self::ForbiddenOrigin
                | Self::NoCredential
                | Self::AuthenticationFailed(_)
        )
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Return auth failures without latching the client.
    pub suppress_auth_latch: bool,
}

impl RequestOptions {
    /// Options for probe calls whose auth failure must not disable the client.
    #[must_use]
    pub const fn warmup() -> Self {
        Self {
            suppress_auth_latch: true,
        }
    }
}

/// Configuration for the polling client.
#[derive(Debug, Clone)]
pub struct PollingClientConfig {
    /// REST base URL without trailing slash.
    pub base_url: String,
    /// Provider credential.
    pub credential: Credential,
    /// Whether the base URL is a credential-injecting proxy.
    pub proxied: bool,
    /// Whether network access is allowed.
    pub network_allowed: bool,
    /// Request window.
    pub rate_limit: RateLimitConfig,
    /// 429 backoff.
    pub throttle: ThrottleConfig,
    /// Tickers per concurrent batch group.
    pub batch_size: usize,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl PollingClientConfig {
    /// Create a configuration with default polling settings.
    #[must_use]
    pub fn new(base_url: impl Into<String>, credential: Credential) -> Self {
        Self::from_polling_settings(base_url, credential, &PollingSettings::default())
    }

    /// Create configuration from `PollingSettings`.
    #[must_use]
    pub fn from_polling_settings(
        base_url: impl Into<String>,
        credential: Credential,
        settings: &PollingSettings,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
            proxied: false,
            network_allowed: true,
            rate_limit: RateLimitConfig {
                max_requests: settings.rate_limit_max_requests,
                window: settings.rate_limit_window,
            },
            throttle: ThrottleConfig::from_polling_settings(settings),
            batch_size: settings.batch_size.max(1),
            request_timeout: settings.request_timeout,
        }
    }

    /// Create configuration from the full transport configuration.
    #[must_use]
    pub fn from_transport_config(config: &TransportConfig) -> Self {
        Self {
            proxied: config.endpoints.is_proxied(),
            network_allowed: config.network_allowed,
            ..Self::from_polling_settings(
                config.endpoints.rest_base_url.clone(),
                config.credential.clone(),
                &config.polling,
            )
        }
    }
}

/// Outcome counts of a batch fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Quotes fetched.
    pub fetched: usize,
    /// Requests that failed.
    pub failed: usize,
    /// Tickers skipped by the filter.
    pub skipped: usize,
    /// Whether remaining groups were abandoned.
    pub aborted: bool,
}

// =============================================================================
// Polling Client
// =============================================================================

/// REST client for quotes, exchange status and symbol search.
#[derive(Debug)]
pub struct PollingClient {
    http: Client,
    config: PollingClientConfig,
    limiter: RateLimiter,
    throttle: Mutex<ThrottleBackoff>,
    auth_latched: AtomicBool,
}

impl PollingClient {
    /// Create a new polling client.
    ///
    /// # Errors
    ///
    /// Returns `Network` if the HTTP client cannot be built.
    pub fn new(config: PollingClientConfig) -> Result<Self, PollingError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PollingError::Network(e.to_string()))?;

        Ok(Self {
            http,
            limiter: RateLimiter::new(config.rate_limit),
            throttle: Mutex::new(ThrottleBackoff::new(config.throttle)),
            auth_latched: AtomicBool::new(false),
            config,
        })
    }

    /// Fetch a quote snapshot.
    ///
    /// # Errors
    ///
    /// Any [`PollingError`]; `NoData` when the provider has nothing for `ticker`.
    pub async fn fetch_quote(
        &self,
        ticker: &str,
        cancel: &CancellationToken,
    ) -> Result<Quote, PollingError> {
        let response: QuoteResponse = self
            .get_json(
                "/quote",
                &[("symbol", ticker)],
                RequestKind::Quote,
                cancel,
                RequestOptions::default(),
            )
            .await?;

        response
            .into_quote(ticker)
            .ok_or_else(|| PollingError::NoData(ticker.to_string()))
    }

    /// Fetch exchange open/closed status.
    ///
    /// # Errors
    ///
    /// Any [`PollingError`]; `UnresolvedStatus` when no known field is present.
    pub async fn fetch_market_status(
        &self,
        exchange: &str,
        cancel: &CancellationToken,
        options: RequestOptions,
    ) -> Result<MarketStatus, PollingError> {
        let response: MarketStatusResponse = self
            .get_json(
                "/stock/market-status",
                &[("exchange", exchange)],
                RequestKind::MarketStatus,
                cancel,
                options,
            )
            .await?;

        response
            .into_status(exchange)
            .ok_or_else(|| PollingError::UnresolvedStatus(exchange.to_string()))
    }

    /// Search symbols matching `query`.
    ///
    /// # Errors
    ///
    /// Any [`PollingError`].
    pub async fn search_symbols(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SymbolMatch>, PollingError> {
        let response: SearchResponse = self
            .get_json(
                "/search",
                &[("q", query)],
                RequestKind::Search,
                cancel,
                RequestOptions::default(),
            )
            .await?;
        Ok(response.result)
    }

    /// Fetch quotes for every ticker and collect the results.
    ///
    /// Results are in completion order.
    pub async fn fetch_quote_batch(
        &self,
        tickers: &[String],
        cancel: &CancellationToken,
    ) -> Vec<(String, Result<Quote, PollingError>)> {
        let mut results = Vec::with_capacity(tickers.len());
        self.fetch_quote_batch_where(
            tickers,
            cancel,
            |_| false,
            |ticker, result| results.push((ticker.to_string(), result)),
        )
        .await;
        results
    }

    /// Fetch quotes group by group, reporting each result as it completes.
    ///
    /// Tickers are split into groups of `batch_size`. A group runs
    /// concurrently; groups run one after another. `skip` is consulted for
    /// each ticker when its group starts. Cancellation or an authentication
    /// failure abandons the remaining groups.
    pub async fn fetch_quote_batch_where<S, R>(
        &self,
        tickers: &[String],
        cancel: &CancellationToken,
        skip: S,
        mut on_result: R,
    ) -> BatchSummary
    where
        S: Fn(&str) -> bool + Send + Sync,
        R: FnMut(&str, Result<Quote, PollingError>) + Send,
    {
        let mut summary = BatchSummary::default();

        for group in tickers.chunks(self.config.batch_size) {
            if cancel.is_cancelled() {
                summary.aborted = true;
                break;
            }

            let mut in_flight = FuturesUnordered::new();
            for ticker in group {
                if skip(ticker) {
                    tracing::debug!(ticker = %ticker, "Skipping ticker that already has fresh data");
                    summary.skipped += 1;
                    continue;
                }
                in_flight.push(async move { (ticker.as_str(), self.fetch_quote(ticker, cancel).await) });
            }

            let mut stop = false;
            while let Some((ticker, result)) = in_flight.next().await {
                match &result {
                    Ok(_) => summary.fetched += 1,
                    Err(PollingError::Cancelled) => {
                        stop = true;
                        continue;
                    }
                    Err(PollingError::AuthenticationFailed(_)) => {
                        stop = true;
                        summary.failed += 1;
                    }
                    Err(e) => {
                        tracing::debug!(ticker = %ticker, error = %e, "Quote fetch failed");
                        summary.failed += 1;
                    }
                }
                on_result(ticker, result);
            }

            if stop {
                summary.aborted = true;
                break;
            }
        }

        summary
    }

    /// Check whether a request would be refused right now.
    ///
    /// # Errors
    ///
    /// The first failing gate, checked in order: backoff, forbidden origin,
    /// missing credential, latched auth failure.
    pub fn check_available(&self) -> Result<(), PollingError> {
        let now = Instant::now();
        {
            let throttle = self.throttle.lock();
            if throttle.is_backing_off(now)
                && let Some(until) = throttle.backoff_until()
            {
                return Err(PollingError::BackingOff {
                    remaining: until.saturating_duration_since(now),
                });
            }
        }

        if !self.config.network_allowed {
            return Err(PollingError::ForbiddenOrigin);
        }

        if self.config.credential.is_empty() && !self.config.proxied {
            return Err(PollingError::NoCredential);
        }

        if self.auth_latched.load(Ordering::Acquire) {
            return Err(PollingError::AuthenticationFailed(
                "credential previously rejected".to_string(),
            ));
        }

        Ok(())
    }

    /// Snapshot of the throttle backoff.
    #[must_use]
    pub fn backoff_state(&self) -> BackoffState {
        self.throttle.lock().state()
    }

    /// Snapshot of the request window.
    #[must_use]
    pub fn rate_limit_window(&self) -> RateLimitWindow {
        self.limiter.window()
    }

    /// Whether an auth failure has disabled the client.
    #[must_use]
    pub fn is_auth_latched(&self) -> bool {
        self.auth_latched.load(Ordering::Acquire)
    }

    /// Tickers per concurrent batch group.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        kind: RequestKind,
        cancel: &CancellationToken,
        options: RequestOptions,
    ) -> Result<T, PollingError> {
        self.check_available()?;
        self.limiter
            .acquire(cancel)
            .await
            .map_err(|_| PollingError::Cancelled)?;
        // A 429 may have arrived while this call waited for a slot.
        self.check_available()?;

        let url = format!("{}{path}", self.config.base_url);
        let mut request = self.http.get(&url).query(query);
        if !self.config.credential.is_empty() {
            request = request.header(TOKEN_HEADER, self.config.credential.expose());
        }

        metrics::record_request(kind);
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(PollingError::Cancelled),
            response = request.send() => response.map_err(|e| PollingError::Network(e.to_string()))?,
        };

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let state = self.throttle.lock().on_rate_limited(Instant::now());
            metrics::record_rate_limited();
            let backoff_until =
                Utc::now() + TimeDelta::from_std(state.delay).unwrap_or_else(|_| TimeDelta::zero());
            return Err(PollingError::RateLimited {
                backoff_until,
                backoff_delay: state.delay,
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            if !options.suppress_auth_latch {
                tracing::error!(status = status.as_u16(), path, "Provider rejected credential, disabling polling");
                self.auth_latched.store(true, Ordering::Release);
            }
            return Err(PollingError::AuthenticationFailed(format!(
                "provider answered {status}"
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PollingError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| PollingError::Network(e.to_string()))?;

        self.throttle.lock().on_success(Instant::now());

        serde_json::from_str(&text).map_err(|e| PollingError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(config: PollingClientConfig) -> PollingClient {
        PollingClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn forbidden_origin_is_refused_before_network() {
        let mut config = PollingClientConfig::new("http://127.0.0.1:9", Credential::new("k"));
        config.network_allowed = false;
        let client = client(config);

        let result = client.fetch_quote("AAPL", &CancellationToken::new()).await;
        assert_eq!(result, Err(PollingError::ForbiddenOrigin));
        assert_eq!(client.rate_limit_window().request_count, 0);
    }

    #[tokio::test]
    async fn missing_credential_is_refused() {
        let client = client(PollingClientConfig::new("http://127.0.0.1:9", Credential::default()));
        let result = client.fetch_quote("AAPL", &CancellationToken::new()).await;
        assert_eq!(result, Err(PollingError::NoCredential));
        assert_eq!(result.unwrap_err().error_code(), Some(ErrorCode::NoCredential));
    }

    #[tokio::test]
    async fn proxy_needs_no_credential() {
        let mut config = PollingClientConfig::new("http://127.0.0.1:9", Credential::default());
        config.proxied = true;
        assert!(client(config).check_available().is_ok());
    }

    #[tokio::test]
    async fn backoff_checked_before_other_gates() {
        let mut config = PollingClientConfig::new("http://127.0.0.1:9", Credential::default());
        config.network_allowed = false;
        let client = client(config);
        client.throttle.lock().on_rate_limited(Instant::now());

        assert!(matches!(
            client.check_available(),
            Err(PollingError::BackingOff { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_before_send() {
        let client = client(PollingClientConfig::new("http://127.0.0.1:9", Credential::new("k")));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = client.search_symbols("apple", &cancel).await;
        assert_eq!(result, Err(PollingError::Cancelled));
    }

    #[test]
    fn warmup_suppresses_latch() {
        assert!(RequestOptions::warmup().suppress_auth_latch);
        assert!(!RequestOptions::default().suppress_auth_latch);
    }
}
