//! Throttle Backoff
//!
//! Cooldown imposed after the provider answers HTTP 429.
//!
//! Growth is linear, unlike the streaming reconnect policy: the first 429
//! jumps straight to `initial`, every further 429 before recovery adds
//! `increment`, and the delay never exceeds `max`. A success observed after
//! the cooldown has elapsed clears the delay.

use std::time::Duration;

use tokio::time::Instant;

use crate::infrastructure::config::PollingSettings;

/// Configuration for 429 backoff.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    /// Delay applied on the first 429.
    pub initial: Duration,
    /// Delay added on every subsequent 429 before recovery.
    pub increment: Duration,
    /// Ceiling for the delay.
    pub max: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(30),
            increment: Duration::from_secs(30),
            max: Duration::from_secs(120),
        }
    }
}

impl ThrottleConfig {
    /// Create configuration from `PollingSettings`.
    #[must_use]
    pub const fn from_polling_settings(settings: &PollingSettings) -> Self {
        Self {
            initial: settings.backoff_initial,
            increment: settings.backoff_increment,
            max: settings.backoff_max,
        }
    }
}

/// Snapshot of the backoff state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    /// Current cooldown length (zero when recovered).
    pub delay: Duration,
    /// Earliest instant a request may be issued.
    pub next_allowed_at: Option<Instant>,
    /// Consecutive 429s since the last recovery.
    pub attempt_count: u32,
}

/// Linear backoff controller for provider throttling.
#[derive(Debug)]
pub struct ThrottleBackoff {
    config: ThrottleConfig,
    delay: Duration,
    until: Option<Instant>,
    attempts: u32,
}

impl ThrottleBackoff {
    /// Create a recovered controller.
    #[must_use]
    pub const fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            delay: Duration::ZERO,
            until: None,
            attempts: 0,
        }
    }

    /// Record a 429 at `now` and return the new state.
    pub fn on_rate_limited(&mut self, now: Instant) -> BackoffState {
        self.delay = if self.delay.is_zero() {
            self.config.initial
        } else {
            self.delay.saturating_add(self.config.increment)
        }
        .min(self.config.max);
        self.attempts += 1;
        self.until = Some(now + self.delay);

        tracing::warn!(
            delay_ms = self.delay.as_millis(),
            attempts = self.attempts,
            "Provider throttled request, backing off"
        );

        self.state()
    }

    /// Record a successful response at `now`.
    ///
    /// Only clears the delay once the cooldown has elapsed; a straggling
    /// success from a request issued before the 429 does not count.
    pub fn on_success(&mut self, now: Instant) {
        if self.delay.is_zero() {
            return;
        }
        if self.until.is_none_or(|until| now >= until) {
            tracing::info!(previous_delay_ms = self.delay.as_millis(), "Throttle backoff recovered");
            self.delay = Duration::ZERO;
            self.until = None;
            self.attempts = 0;
        }
    }

    /// Check whether `now` falls inside the cooldown window.
    #[must_use]
    pub fn is_backing_off(&self, now: Instant) -> bool {
        self.until.is_some_and(|until| now < until)
    }

    /// End of the current cooldown, if one was ever set since recovery.
    #[must_use]
    pub const fn backoff_until(&self) -> Option<Instant> {
        self.until
    }

    /// Current snapshot.
    #[must_use]
    pub const fn state(&self) -> BackoffState {
        BackoffState {
            delay: self.delay,
            next_allowed_at: self.until,
            attempt_count: self.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> ThrottleBackoff {
        ThrottleBackoff::new(ThrottleConfig {
            initial: Duration::from_secs(30),
            increment: Duration::from_secs(30),
            max: Duration::from_secs(120),
        })
    }

    #[test]
    fn starts_recovered() {
        let b = backoff();
        assert_eq!(b.state().delay, Duration::ZERO);
        assert!(!b.is_backing_off(Instant::now()));
    }

    #[test]
    fn first_429_sets_initial_delay() {
        let mut b = backoff();
        let now = Instant::now();
        let state = b.on_rate_limited(now);
        assert_eq!(state.delay, Duration::from_secs(30));
        assert_eq!(state.next_allowed_at, Some(now + Duration::from_secs(30)));
        assert!(b.is_backing_off(now + Duration::from_secs(29)));
        assert!(!b.is_backing_off(now + Duration::from_secs(30)));
    }

    #[test]
    fn growth_is_linear_and_capped() {
        let mut b = backoff();
        let now = Instant::now();
        let delays: Vec<_> = (0..6).map(|_| b.on_rate_limited(now).delay.as_secs()).collect();
        assert_eq!(delays, vec![30, 60, 90, 120, 120, 120]);
    }

    #[test]
    fn early_success_does_not_reset() {
        let mut b = backoff();
        let now = Instant::now();
        b.on_rate_limited(now);
        b.on_success(now + Duration::from_secs(5));
        assert_eq!(b.state().delay, Duration::from_secs(30));
    }

    #[test]
    fn success_after_cooldown_resets() {
        let mut b = backoff();
        let now = Instant::now();
        b.on_rate_limited(now);
        b.on_rate_limited(now);
        b.on_success(now + Duration::from_secs(61));

        let state = b.state();
        assert_eq!(state.delay, Duration::ZERO);
        assert_eq!(state.attempt_count, 0);
        assert!(state.next_allowed_at.is_none());
    }
}
