//! Heartbeat Manager
//!
//! Monitors streaming connection liveness. On every tick the manager asks the
//! connection to send a ping; if nothing has been heard from the provider for
//! longer than the liveness timeout it reports a timeout instead, so silently
//! dead sockets that never produce a close frame still get replaced.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::StreamSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between liveness checks / outbound pings.
    pub ping_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::from_interval(Duration::from_secs(30))
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Interval-derived configuration: the timeout is twice the interval.
    #[must_use]
    pub fn from_interval(ping_interval: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout: ping_interval.saturating_mul(2),
        }
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self::from_interval(settings.heartbeat_interval)
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Request to send a ping message.
    SendPing,
    /// Liveness timeout, connection should be restarted.
    Timeout,
}

/// State shared between heartbeat manager and the connection reader.
#[derive(Debug)]
pub struct HeartbeatState {
    last_pong: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_pong: RwLock::new(Instant::now()),
        }
    }

    /// Record that the provider showed signs of life.
    pub fn record_pong(&self) {
        *self.last_pong.write() = Instant::now();
    }

    /// Get the time since last pong.
    #[must_use]
    pub fn time_since_pong(&self) -> Duration {
        self.last_pong.read().elapsed()
    }

    /// Reset state for new connection.
    pub fn reset(&self) {
        self.record_pong();
    }
}

/// Heartbeat manager that monitors connection health.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the heartbeat monitoring loop until cancelled or a timeout is detected.
    pub async fn run(self) {
        let start = Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check_and_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Returns `Err(())` if a timeout occurred or the channel closed.
    async fn check_and_ping(&self) -> Result<(), ()> {
        let elapsed = self.state.time_since_pong();
        if elapsed > self.config.pong_timeout {
            tracing::warn!(
                elapsed_secs = elapsed.as_secs(),
                timeout_secs = self.config.pong_timeout.as_secs(),
                "Heartbeat timeout detected"
            );
            let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
            return Err(());
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return Err(());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_twice_the_interval() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.pong_timeout, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn manager_sends_ping_events() {
        let config = HeartbeatConfig::from_interval(Duration::from_secs(30));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(HeartbeatManager::new(config, state, event_tx, cancel.clone()).run());

        assert_eq!(event_rx.recv().await, Some(HeartbeatEvent::SendPing));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_keep_connection_alive() {
        let config = HeartbeatConfig::from_interval(Duration::from_secs(30));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatManager::new(config, Arc::clone(&state), event_tx, cancel.clone()).run(),
        );

        for _ in 0..5 {
            assert_eq!(event_rx.recv().await, Some(HeartbeatEvent::SendPing));
            state.record_pong();
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silence_triggers_timeout() {
        let config = HeartbeatConfig::from_interval(Duration::from_secs(30));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(HeartbeatManager::new(config, state, event_tx, cancel).run());

        let mut events = Vec::new();
        while let Some(event) = event_rx.recv().await {
            events.push(event);
        }

        // Pings at 30s and 60s, then silence exceeds 60s at the 90s tick.
        assert_eq!(
            events,
            vec![
                HeartbeatEvent::SendPing,
                HeartbeatEvent::SendPing,
                HeartbeatEvent::Timeout
            ]
        );
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manager_cancellation() {
        let config = HeartbeatConfig::from_interval(Duration::from_secs(10));
        let (event_tx, _event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatManager::new(config, Arc::new(HeartbeatState::new()), event_tx, cancel.clone())
                .run(),
        );

        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }
}
