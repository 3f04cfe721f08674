//! # Rate Limiter Configuration
//!
//! Settings for a file-backed token bucket. Every process sharing a state
//! file should use the same settings; the ones held by the handle doing the
//! refill are applied.
//!
//! ## Token Bucket Parameters
//!
//! ```text
//!     ┌──────────────────────────────┐
//!     │   burst_size (capacity)      │ ← Most tokens ever held
//!     │   ┌─────────────────────┐    │
//!     │   │ ● ● ● ● ●           │    │ ← Current tokens (fractional)
//!     │   └─────────────────────┘    │
//!     │                              │
//!     │   rate: 3.0 tokens/second    │ ← Continuous refill
//!     │   lock_timeout: 5s           │ ← Bound on waiting for peers
//!     └──────────────────────────────┘
//! ```
//!
//! Unlike a fixed-interval refill, tokens accrue continuously:
//! `tokens = min(burst_size, tokens + elapsed_seconds * rate)`.

use crate::error::{Error, Result};
use crate::sync::DEFAULT_LOCK_TIMEOUT;
use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

/// Largest burst for which every whole token count is exact in an `f64`.
pub const MAX_BURST_SIZE: u64 = 1 << 53;

/// File extension used for state files.
pub const STATE_FILE_EXTENSION: &str = "ratelimit";

/// Configuration for [`FileRateLimiter`](crate::FileRateLimiter) instances.
///
/// ## Examples
///
/// ```rust
/// use durable_rater::FileRateLimiterConfig;
/// use std::time::Duration;
///
/// // 3 tokens/second, burst of 5 (the defaults)
/// let config = FileRateLimiterConfig::default();
///
/// // Per-second limiting with 2x burst headroom
/// let config = FileRateLimiterConfig::per_second(10);
/// assert_eq!(config.burst_size, 20);
///
/// // Fully custom
/// let config = FileRateLimiterConfig::new(0.5, 2)
///     .with_lock_timeout(Duration::from_millis(250));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FileRateLimiterConfig {
    /// Tokens added per second.
    pub rate: f64,

    /// Bucket capacity, the largest number of requests allowed back to back.
    pub burst_size: u64,

    /// Longest wait for the cross-process lock before an operation gives up.
    /// Zero means a single attempt.
    pub lock_timeout: Duration,
}

impl Default for FileRateLimiterConfig {
    /// 3 tokens per second, burst of 5, 5 second lock timeout.
    fn default() -> Self {
        Self {
            rate: 3.0,
            burst_size: 5,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl FileRateLimiterConfig {
    /// Creates a configuration with the default lock timeout.
    ///
    /// # Example
    ///
    /// ```rust
    /// use durable_rater::FileRateLimiterConfig;
    ///
    /// // One request every two seconds, at most 4 at once
    /// let config = FileRateLimiterConfig::new(0.5, 4);
    /// ```
    pub fn new(rate: f64, burst_size: u64) -> Self {
        Self {
            rate,
            burst_size,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Limits by requests per second, with a burst of twice the rate.
    pub fn per_second(requests_per_second: u32) -> Self {
        Self::new(
            requests_per_second as f64,
            (requests_per_second as u64).saturating_mul(2),
        )
    }

    /// Limits by requests per minute; the whole quota may be spent at once.
    ///
    /// ```rust
    /// use durable_rater::FileRateLimiterConfig;
    ///
    /// let config = FileRateLimiterConfig::per_minute(120);
    /// assert_eq!(config.rate, 2.0);
    /// assert_eq!(config.burst_size, 120);
    /// ```
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(requests_per_minute as f64 / 60.0, requests_per_minute as u64)
    }

    /// Sets the bound on waiting for the cross-process lock.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Sets the burst capacity as a multiple of the per-second rate.
    ///
    /// ```rust
    /// use durable_rater::FileRateLimiterConfig;
    ///
    /// let config = FileRateLimiterConfig::per_second(10).with_burst_multiplier(5);
    /// assert_eq!(config.burst_size, 50);
    /// ```
    pub fn with_burst_multiplier(mut self, multiplier: u32) -> Self {
        self.burst_size = (self.rate * multiplier as f64).ceil() as u64;
        self
    }

    /// Checks that the parameters describe a usable bucket.
    ///
    /// # Errors
    ///
    /// - `rate` is not a positive finite number
    /// - `burst_size` is 0 or above [`MAX_BURST_SIZE`]
    ///
    /// ```rust
    /// use durable_rater::FileRateLimiterConfig;
    ///
    /// assert!(FileRateLimiterConfig::new(0.0, 5).validate().is_err());
    /// assert!(FileRateLimiterConfig::new(1.0, 0).validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err("rate must be a positive finite number");
        }
        if self.burst_size == 0 {
            return Err("burst_size must be greater than 0");
        }
        if self.burst_size > MAX_BURST_SIZE {
            return Err("burst_size exceeds the exact f64 integer range");
        }
        Ok(())
    }

    /// Time it takes to refill one token.
    pub fn token_interval(&self) -> Duration {
        duration_from_secs(1.0 / self.rate)
    }
}

/// Converts seconds to a `Duration`, clamping negatives and NaN to zero and
/// overflow to `Duration::MAX`.
pub(crate) fn duration_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Per-user directory for rate limiter state files
/// (`~/.local/share/durable-rater/ratelimit` on Linux).
///
/// # Errors
///
/// [`Error::InvalidConfig`] when no home directory can be determined.
pub fn default_state_dir() -> Result<PathBuf> {
    ProjectDirs::from("", "", env!("CARGO_PKG_NAME"))
        .map(|dirs| dirs.data_local_dir().join("ratelimit"))
        .ok_or(Error::InvalidConfig("no home directory for default state dir"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FileRateLimiterConfig::default();
        assert_eq!(config.rate, 3.0);
        assert_eq!(config.burst_size, 5);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(FileRateLimiterConfig::new(f64::NAN, 5).validate().is_err());
        assert!(FileRateLimiterConfig::new(f64::INFINITY, 5).validate().is_err());
        assert!(FileRateLimiterConfig::new(-1.0, 5).validate().is_err());
        assert!(FileRateLimiterConfig::new(1.0, 0).validate().is_err());
        assert!(FileRateLimiterConfig::new(1.0, MAX_BURST_SIZE + 1)
            .validate()
            .is_err());

        // Zero lock timeout is a valid "try once" setting
        let once = FileRateLimiterConfig::new(1.0, 1).with_lock_timeout(Duration::ZERO);
        assert!(once.validate().is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = FileRateLimiterConfig::per_second(100);
        assert_eq!(config.burst_size, 200);
        assert_eq!(config.rate, 100.0);

        let config = FileRateLimiterConfig::per_minute(30);
        assert_eq!(config.rate, 0.5);
        assert_eq!(config.burst_size, 30);

        let config = FileRateLimiterConfig::new(2.5, 1).with_burst_multiplier(3);
        assert_eq!(config.burst_size, 8);
    }

    #[test]
    fn test_token_interval() {
        assert_eq!(
            FileRateLimiterConfig::new(4.0, 1).token_interval(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_duration_from_secs_clamps() {
        assert_eq!(duration_from_secs(-3.0), Duration::ZERO);
        assert_eq!(duration_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(duration_from_secs(f64::INFINITY), Duration::MAX);
        assert_eq!(duration_from_secs(1.5), Duration::from_millis(1500));
    }

    #[test]
    fn test_default_state_dir_is_namespaced() {
        // Containers without HOME legitimately report an error
        if let Ok(dir) = default_state_dir() {
            assert!(dir.ends_with("ratelimit"));
            assert!(dir.to_string_lossy().contains(env!("CARGO_PKG_NAME")));
        }
    }
}
