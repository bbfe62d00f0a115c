//! Request Rate Limiter
//!
//! Fixed-window request counter guarding outbound REST calls.
//!
//! When the window is full the caller is suspended until the window would
//! naturally reset; requests are never silently dropped.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Configuration for the request window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

/// Snapshot of the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    /// When the current window opened.
    pub window_start: Instant,
    /// Requests counted in the current window.
    pub request_count: u32,
    /// Window length.
    pub window_duration: Duration,
    /// Requests allowed per window.
    pub max_requests: u32,
}

impl RateLimitWindow {
    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window_duration
    }
}

/// Error returned when a wait for a request slot is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limit wait cancelled")]
pub struct Cancelled;

/// Blocking fixed-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    window: Mutex<RateLimitWindow>,
}

impl RateLimiter {
    /// Create a limiter whose first window opens now.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            window: Mutex::new(RateLimitWindow {
                window_start: Instant::now(),
                request_count: 0,
                window_duration: config.window,
                max_requests: config.max_requests.max(1),
            }),
        }
    }

    /// Take a slot without waiting.
    ///
    /// Returns `Err(wait)` with the time left until the window resets when full.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut window = self.window.lock();

        if window.expired(now) {
            window.window_start = now;
            window.request_count = 0;
        }

        if window.request_count < window.max_requests {
            window.request_count += 1;
            return Ok(());
        }

        let resets_at = window.window_start + window.window_duration;
        Err(resets_at.saturating_duration_since(now))
    }

    /// Take a slot, suspending the caller until one is free.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if `cancel` fires while waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            tracing::debug!(wait_ms = wait.as_millis(), "Request window full, waiting");

            tokio::select! {
                () = cancel.cancelled() => return Err(Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Current window snapshot.
    #[must_use]
    pub fn window(&self) -> RateLimitWindow {
        *self.window.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window: Duration::from_secs(window_secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn max_requests_pass_without_waiting() {
        let limiter = limiter(3, 60);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire(&cancel).await.unwrap();
        }

        assert_eq!(Instant::now(), start);
        assert_eq!(limiter.window().request_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn request_over_limit_blocks_until_window_resets() {
        let limiter = limiter(2, 60);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();
        assert!(limiter.try_acquire().is_err());

        limiter.acquire(&cancel).await.unwrap();

        assert!(Instant::now() - start >= Duration::from_secs(60));
        let window = limiter.window();
        assert_eq!(window.request_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_cancellable() {
        let limiter = limiter(1, 60);
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let waiter_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = limiter.acquire(&waiter_cancel).await;
            (result, limiter.window().request_count)
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let (result, count) = handle.await.unwrap();
        assert_eq!(result, Err(Cancelled));
        assert_eq!(count, 1);
    }

    #[test]
    fn try_acquire_reports_remaining_wait() {
        let limiter = limiter(1, 60);
        assert!(limiter.try_acquire().is_ok());
        let wait = limiter.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_secs(60));
        assert!(wait > Duration::from_secs(59));
    }
}
