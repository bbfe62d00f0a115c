//! Streaming Connection
//!
//! Long-lived duplex connection to the provider's trade stream.
//!
//! # Lifecycle
//!
//! ```text
//!  connect()        open ok                close / heartbeat timeout
//! ───────────► Connecting ──────► Connected ─────────────────────► Disconnected
//!                  ▲                                                   │
//!                  │            delay elapsed                          ▼
//!                  └──────────────────────────────────────────── Reconnecting
//!
//!  stop() from any state, or retries exhausted ──► Stopped
//! ```
//!
//! Every successful open resets the reconnect policy, resends the full
//! subscription set and starts a fresh heartbeat monitor. `Stopped` is only
//! left through another explicit `connect()`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::WireMessage;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{StreamConnector, StreamError, WireSink, WireSource};
use crate::domain::quote::TradeTick;
use crate::domain::subscription::{SubscriptionSet, Symbol};
use crate::infrastructure::config::{Credential, StreamSettings};
use crate::infrastructure::metrics;

// =============================================================================
// State and Events
// =============================================================================

/// Connection state. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, nothing scheduled.
    Disconnected,
    /// Open attempt in flight.
    Connecting,
    /// Channel open.
    Connected,
    /// Waiting out a reconnect delay.
    Reconnecting,
    /// Terminal until an explicit `connect()`.
    Stopped,
}

/// Events emitted by the streaming connection.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Channel opened and subscriptions resent.
    Connected,
    /// Open channel lost.
    Disconnected {
        /// Cause of the drop.
        reason: String,
    },
    /// An open attempt failed.
    ConnectFailed {
        /// Failure.
        error: StreamError,
    },
    /// Reconnect scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Provider rejected the credential; no reconnect will follow.
    AuthRejected {
        /// Provider message.
        message: String,
    },
    /// Retries exhausted; state is `Stopped`.
    GaveUp {
        /// Reconnect attempts made.
        attempts: u32,
    },
    /// Provider-side error notice on an open channel.
    ProviderError(String),
    /// One trade tick, in wire order.
    Tick(TradeTick),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the streaming connection.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// WebSocket URL without credential.
    pub url: String,
    /// Provider credential, appended as `?token=` when non-empty.
    pub credential: Credential,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Timeout for a single open attempt.
    pub connect_timeout: Duration,
}

impl StreamClientConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>, credential: Credential) -> Self {
        Self::from_stream_settings(url, credential, &StreamSettings::default())
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub fn from_stream_settings(
        url: impl Into<String>,
        credential: Credential,
        settings: &StreamSettings,
    ) -> Self {
        Self {
            url: url.into(),
            credential,
            reconnect: ReconnectConfig::from_stream_settings(settings),
            heartbeat: HeartbeatConfig::from_stream_settings(settings),
            connect_timeout: settings.connect_timeout,
        }
    }

    /// URL to dial, with the credential attached when one is set.
    ///
    /// # Errors
    ///
    /// Returns `ConnectFailed` if the URL does not parse.
    pub fn authenticated_url(&self) -> Result<String, StreamError> {
        if self.credential.is_empty() {
            return Ok(self.url.clone());
        }
        let mut url = reqwest::Url::parse(&self.url)
            .map_err(|e| StreamError::ConnectFailed(format!("invalid stream URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("token", self.credential.expose());
        Ok(url.into())
    }
}

// =============================================================================
// Streaming Connection
// =============================================================================

struct Inner {
    config: StreamClientConfig,
    connector: Arc<dyn StreamConnector>,
    codec: JsonCodec,
    events: mpsc::UnboundedSender<StreamEvent>,
    state: RwLock<ConnectionState>,
    // Lock order: subscriptions, then outbound, then state.
    subscriptions: Mutex<SubscriptionSet>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WireMessage>>>,
    open_attempts: AtomicU32,
}

/// Resilient streaming connection.
///
/// Manages the connection lifecycle including:
/// - Heartbeat monitoring
/// - Automatic reconnection with capped exponential backoff
/// - Subscription bookkeeping across reconnects
pub struct StreamingConnection {
    inner: Arc<Inner>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for StreamingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingConnection")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StreamingConnection {
    /// Create a disconnected connection. Events are delivered on `events`.
    #[must_use]
    pub fn new(
        config: StreamClientConfig,
        connector: Arc<dyn StreamConnector>,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                codec: JsonCodec::new(),
                events,
                state: RwLock::new(ConnectionState::Disconnected),
                subscriptions: Mutex::new(SubscriptionSet::new()),
                outbound: Mutex::new(None),
                open_attempts: AtomicU32::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the connection task. No-op while a task is already running.
    ///
    /// # Errors
    ///
    /// Returns `ConnectFailed` if the stream URL is invalid.
    pub fn connect(&self) -> Result<(), StreamError> {
        let url = self.inner.config.authenticated_url()?;

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return Ok(());
        }

        self.inner.set_state(ConnectionState::Connecting);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.inner).run(url, cancel.clone()));
        *task = Some((cancel, handle));
        Ok(())
    }

    /// Stop the connection, suppress reconnects and wait for the task to exit.
    ///
    /// The subscription set is cleared.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        self.inner.set_state(ConnectionState::Stopped);

        if let Some((cancel, handle)) = task {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Streaming task ended abnormally");
            }
        }

        let mut subs = self.inner.subscriptions.lock();
        *self.inner.outbound.lock() = None;
        subs.clear();
        self.inner.set_state(ConnectionState::Stopped);
        drop(subs);
        metrics::set_stream_connected(false);
    }

    /// Add symbols. Sent immediately when connected, queued otherwise.
    pub fn subscribe(&self, symbols: impl IntoIterator<Item = Symbol>) {
        let mut subs = self.inner.subscriptions.lock();
        if self.inner.state() == ConnectionState::Connected {
            let added = subs.add_active(symbols);
            if let Some(tx) = self.inner.outbound.lock().as_ref() {
                for symbol in added {
                    let _ = tx.send(WireMessage::subscribe(symbol));
                }
            }
        } else {
            subs.add_pending(symbols);
        }
    }

    /// Remove symbols. Unsubscribes on the wire when connected.
    pub fn unsubscribe<'a>(&self, symbols: impl IntoIterator<Item = &'a Symbol>) {
        let mut subs = self.inner.subscriptions.lock();
        let was_active = subs.remove(symbols);
        if self.inner.state() == ConnectionState::Connected
            && let Some(tx) = self.inner.outbound.lock().as_ref()
        {
            for symbol in was_active {
                let _ = tx.send(WireMessage::unsubscribe(symbol));
            }
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Check if the channel is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Snapshot of the subscription set.
    #[must_use]
    pub fn subscriptions(&self) -> SubscriptionSet {
        self.inner.subscriptions.lock().clone()
    }

    /// Open attempts made since creation.
    #[must_use]
    pub fn open_attempts(&self) -> u32 {
        self.inner.open_attempts.load(Ordering::Relaxed)
    }
}

/// How a session ended.
enum SessionEnd {
    Cancelled,
    Lost(StreamError),
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write();
        if *current != state {
            tracing::debug!(from = ?*current, to = ?state, "Stream state change");
            *current = state;
        }
    }

    fn emit(&self, event: StreamEvent) {
        // Receiver gone means the owner is shutting down.
        let _ = self.events.send(event);
    }

    /// Connection loop: open, run the session, back off, repeat.
    async fn run(self: Arc<Self>, url: String, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if cancel.is_cancelled() {
                return;
            }

            self.set_state(ConnectionState::Connecting);
            self.open_attempts.fetch_add(1, Ordering::Relaxed);
            tracing::info!(url = %self.config.url, "Connecting to quote stream");

            let opened = tokio::select! {
                () = cancel.cancelled() => return,
                result = tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&url)) => {
                    result.unwrap_or(Err(StreamError::ConnectTimeout))
                }
            };

            match opened {
                Ok((sink, source)) => {
                    policy.reset();
                    match self.run_session(sink, source, &cancel).await {
                        SessionEnd::Cancelled => return,
                        SessionEnd::Lost(error) => {
                            tracing::warn!(error = %error, "Quote stream disconnected");
                            self.mark_disconnected();
                            self.emit(StreamEvent::Disconnected {
                                reason: error.to_string(),
                            });
                        }
                    }
                }
                Err(StreamError::AuthRejected(message)) => {
                    tracing::error!(message = %message, "Quote stream rejected credential");
                    self.set_state(ConnectionState::Stopped);
                    self.emit(StreamEvent::AuthRejected { message });
                    return;
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Quote stream connect failed");
                    self.set_state(ConnectionState::Disconnected);
                    self.emit(StreamEvent::ConnectFailed { error });
                }
            }

            if cancel.is_cancelled() {
                return;
            }

            let Some(delay) = policy.next_delay() else {
                let attempts = policy.attempt_count();
                tracing::error!(attempts, "Quote stream reconnect attempts exhausted");
                self.set_state(ConnectionState::Stopped);
                self.emit(StreamEvent::GaveUp { attempts });
                return;
            };

            let attempt = policy.attempt_count();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to quote stream"
            );
            self.set_state(ConnectionState::Reconnecting);
            metrics::record_reconnect();
            self.emit(StreamEvent::Reconnecting { attempt, delay });

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn mark_disconnected(&self) {
        let _subs = self.subscriptions.lock();
        *self.outbound.lock() = None;
        if self.state() != ConnectionState::Stopped {
            self.set_state(ConnectionState::Disconnected);
        }
        metrics::set_stream_connected(false);
    }

    /// Run one open channel until it drops or `cancel` fires.
    async fn run_session(
        &self,
        mut sink: WireSink,
        mut source: WireSource,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        let resend = {
            let mut subs = self.subscriptions.lock();
            let resend = subs.activate_all();
            *self.outbound.lock() = Some(out_tx);
            self.set_state(ConnectionState::Connected);
            resend
        };

        tracing::info!(symbols = resend.len(), "Quote stream connected");
        metrics::set_stream_connected(true);
        self.emit(StreamEvent::Connected);

        for symbol in resend {
            if let Err(e) = self.send(&mut sink, &WireMessage::subscribe(symbol)).await {
                return SessionEnd::Lost(e);
            }
        }

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(8);
        let heartbeat_cancel = cancel.child_token();
        let heartbeat_handle = tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );

        let end = loop {
            tokio::select! {
                () = cancel.cancelled() => break SessionEnd::Cancelled,
                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::SendPing => {
                        if let Err(e) = self.send(&mut sink, &WireMessage::Ping).await {
                            break SessionEnd::Lost(e);
                        }
                    }
                    HeartbeatEvent::Timeout => break SessionEnd::Lost(StreamError::HeartbeatTimeout),
                },
                Some(message) = out_rx.recv() => {
                    if let Err(e) = self.send(&mut sink, &message).await {
                        break SessionEnd::Lost(e);
                    }
                }
                frame = source.next() => match frame {
                    Some(Ok(text)) => {
                        heartbeat_state.record_pong();
                        if let Err(e) = self.handle_frame(&text, &mut sink).await {
                            break SessionEnd::Lost(e);
                        }
                    }
                    Some(Err(e)) => break SessionEnd::Lost(e),
                    None => break SessionEnd::Lost(StreamError::Closed),
                },
            }
        };

        heartbeat_cancel.cancel();
        let _ = heartbeat_handle.await;
        let _ = sink.close().await;
        end
    }

    async fn handle_frame(&self, text: &str, sink: &mut WireSink) -> Result<(), StreamError> {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected inbound frame");
                return Ok(());
            }
        };

        match message {
            WireMessage::Ping => self.send(sink, &WireMessage::Pong).await?,
            WireMessage::Pong => {}
            WireMessage::Trade { .. } => {
                for tick in JsonCodec::trade_ticks(&message) {
                    self.emit(StreamEvent::Tick(tick));
                }
            }
            WireMessage::Error { msg } => {
                tracing::warn!(message = %msg, "Provider stream error");
                self.emit(StreamEvent::ProviderError(msg));
            }
            WireMessage::Subscribe { .. } | WireMessage::Unsubscribe { .. } => {}
        }
        Ok(())
    }

    async fn send(&self, sink: &mut WireSink, message: &WireMessage) -> Result<(), StreamError> {
        let text = self
            .codec
            .encode(message)
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        sink.send(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_without_credential_is_unchanged() {
        let config = StreamClientConfig::new("wss://ws.example.com", Credential::default());
        assert_eq!(config.authenticated_url().unwrap(), "wss://ws.example.com");
    }

    #[test]
    fn url_with_credential_gets_token() {
        let config = StreamClientConfig::new("wss://ws.example.com/", Credential::new("abc"));
        assert_eq!(
            config.authenticated_url().unwrap(),
            "wss://ws.example.com/?token=abc"
        );
    }

    #[test]
    fn url_with_existing_query_appends_token() {
        let config = StreamClientConfig::new("wss://ws.example.com/feed?v=2", Credential::new("abc"));
        assert_eq!(
            config.authenticated_url().unwrap(),
            "wss://ws.example.com/feed?v=2&token=abc"
        );
    }

    #[test]
    fn invalid_url_is_rejected() {
        let config = StreamClientConfig::new("not a url", Credential::new("abc"));
        assert!(config.authenticated_url().is_err());
    }

    #[test]
    fn config_uses_stream_settings() {
        let settings = StreamSettings {
            heartbeat_interval: Duration::from_secs(10),
            max_reconnect_attempts: 4,
            ..StreamSettings::default()
        };
        let config = StreamClientConfig::from_stream_settings("wss://x", Credential::default(), &settings);
        assert_eq!(config.heartbeat.pong_timeout, Duration::from_secs(20));
        assert_eq!(config.reconnect.max_attempts, 4);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }
}
