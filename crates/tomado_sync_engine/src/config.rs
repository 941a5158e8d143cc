//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the REST service, without a trailing slash.
    pub base_url: String,
    /// Maximum number of queue items pushed per cycle.
    pub push_batch_size: u32,
    /// Interval for automatic sync, if enabled.
    pub auto_sync_interval: Option<Duration>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Retry configuration for failed queue items.
    pub retry: RetryConfig,
    /// Capacity of the state change channel.
    pub event_capacity: usize,
    /// Whether the engine assumes connectivity at startup.
    pub start_online: bool,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            push_batch_size: 50,
            auto_sync_interval: None,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            event_capacity: 64,
            start_online: true,
        }
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: u32) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the interval for automatic sync.
    pub fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval = Some(interval);
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the capacity of the state change channel.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Sets whether the engine starts online.
    pub fn with_start_online(mut self, online: bool) -> Self {
        self.start_online = online;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("http://localhost:3000/api")
    }
}

/// Configuration for retrying failed queue items.
///
/// A failed item becomes eligible again once `delay_for_attempt(attempts)`
/// has elapsed since its last attempt. Items that reached `max_attempts`
/// stay failed until retried by hand.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempt ceiling; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a retry configuration with an attempt ceiling.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(600),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration that retries failed items forever.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            ..Self::new(0)
        }
    }

    /// Creates a configuration that retries on every cycle without delay.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            ..Self::unbounded()
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay after `attempts` failures.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }

        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(delay_secs.max(0.0))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(8)
    }
}
