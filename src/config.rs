//! Quota configuration and its live-updatable handle.
//!
//! A quota is "at most `max_requests` admissions per fixed window". The active
//! quota sits behind an `ArcSwap`, so a drain reads one complete snapshot and
//! never mixes `max_requests` from one configuration with the window of another.

use crate::error::ConfigError;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;

/// Default quota: 10 requests per second.
pub const DEFAULT_MAX_REQUESTS: u32 = 10;
/// Default window length in milliseconds.
pub const DEFAULT_WINDOW_MILLIS: u64 = 1000;

/// Fixed-window quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitConfig {
    max_requests: u32,
    window_millis: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: DEFAULT_MAX_REQUESTS, window_millis: DEFAULT_WINDOW_MILLIS }
    }
}

impl RateLimitConfig {
    /// Create a validated quota of `max_requests` per `window`.
    ///
    /// Sub-millisecond precision is truncated. A zero window is accepted and
    /// means the window resets on the next scheduler tick.
    ///
    /// # Examples
    /// ```
    /// use windowgate::RateLimitConfig;
    /// use std::time::Duration;
    /// let cfg = RateLimitConfig::new(5, Duration::from_millis(500)).unwrap();
    /// assert_eq!(cfg.requests_per_second().unwrap(), 10.0);
    /// ```
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, ConfigError> {
        let window_millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        Self::from_millis(max_requests, window_millis)
    }

    /// Same as [`RateLimitConfig::new`] with the window given in milliseconds.
    pub fn from_millis(max_requests: u32, window_millis: u64) -> Result<Self, ConfigError> {
        let cfg = Self { max_requests, window_millis };
        cfg.validate()?;
        Ok(cfg)
    }

    /// `requests_per_second` admissions per one-second window.
    pub fn per_second(requests_per_second: u32) -> Result<Self, ConfigError> {
        Self::from_millis(requests_per_second, 1000)
    }

    /// Reject configurations that can never admit anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::ZeroQuota);
        }
        Ok(())
    }

    /// Admissions allowed per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_millis)
    }

    /// Window length in milliseconds.
    pub fn window_millis(&self) -> u64 {
        self.window_millis
    }

    /// `max_requests / (window_millis / 1000)`.
    ///
    /// Fails with [`ConfigError::ZeroWindow`] instead of returning infinity.
    pub fn requests_per_second(&self) -> Result<f64, ConfigError> {
        if self.window_millis == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(f64::from(self.max_requests) / (self.window_millis as f64 / 1000.0))
    }
}

/// Shared, live-updatable quota.
///
/// Clones observe the same value. Reads are lock-free snapshots; writes replace
/// the whole config at once.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<RateLimitConfig>>,
}

impl ConfigHandle {
    /// Create a handle holding `config`.
    pub fn new(config: RateLimitConfig) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(config)) }
    }

    /// Snapshot the current config.
    pub fn get(&self) -> Arc<RateLimitConfig> {
        self.inner.load_full()
    }

    /// Validate and swap in `config`. On error the previous config stays active.
    pub fn set(&self, config: RateLimitConfig) -> Result<(), ConfigError> {
        if let Err(err) = config.validate() {
            tracing::warn!(
                max_requests = config.max_requests,
                window_millis = config.window_millis,
                error = %err,
                "rejected gate configuration"
            );
            return Err(err);
        }
        self.inner.store(Arc::new(config));
        tracing::info!(
            max_requests = config.max_requests,
            window_millis = config.window_millis,
            "gate reconfigured"
        );
        Ok(())
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
