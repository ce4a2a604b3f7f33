//! Queue policies: retry attempts, backoff, concurrency, retention and
//! admission rate limiting.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::QueueSettings;

/// Largest exponent applied to the backoff base; keeps the delay from overflowing.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base_delay: Duration,
}

impl Backoff {
    pub fn exponential(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Delay before the next attempt, after `attempts_made` failed attempts:
    /// `base * 2^(attempts_made - 1)`.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let shift = attempts_made.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(1000))
    }
}

/// At most `max` jobs may start within each fixed `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max: u32,
    pub window: Duration,
}

/// Policies of one queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueOptions {
    /// Total tries per job, including the first.
    pub attempts: u32,
    pub backoff: Backoff,
    /// Maximum jobs active at once.
    pub concurrency: usize,
    /// Drop completed jobs from the queue (counters are kept).
    pub remove_on_complete: bool,
    /// Drop failed jobs from the queue (counters are kept).
    pub remove_on_fail: bool,
    pub limiter: Option<RateLimit>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
            concurrency: 1,
            remove_on_complete: true,
            remove_on_fail: false,
            limiter: None,
        }
    }
}

impl QueueOptions {
    /// Build options from a `[queues.*]` settings table.
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            attempts: settings.attempts.max(1),
            backoff: Backoff::exponential(Duration::from_millis(settings.backoff_delay_ms)),
            concurrency: settings.concurrency.max(1),
            remove_on_complete: settings.remove_on_complete,
            remove_on_fail: settings.remove_on_fail,
            limiter: None,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration) -> Self {
        self.backoff = Backoff::exponential(base_delay);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_limiter(mut self, max: u32, window: Duration) -> Self {
        self.limiter = Some(RateLimit { max, window });
        self
    }

    pub fn keep_completed(mut self) -> Self {
        self.remove_on_complete = false;
        self
    }
}

/// Fixed-window counter enforcing a [`RateLimit`].
#[derive(Debug)]
pub(crate) struct RateLimiter {
    limit: RateLimit,
    window_start: Instant,
    started: u32,
}

impl RateLimiter {
    pub(crate) fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            window_start: Instant::now(),
            started: 0,
        }
    }

    /// Count one start if the current window has room, otherwise return how
    /// long until the window resets.
    pub(crate) fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= self.limit.window {
            self.window_start = now;
            self.started = 0;
        }
        if self.started < self.limit.max {
            self.started += 1;
            Ok(())
        } else {
            let elapsed = now.saturating_duration_since(self.window_start);
            Err(self.limit.window.saturating_sub(elapsed))
        }
    }
}
