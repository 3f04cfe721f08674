//! # Limiter Metrics
//!
//! Per-handle counters for a file-backed limiter. The limiter fails closed,
//! so a denial can mean either "bucket empty" or "could not consult the
//! bucket". The metrics keep the two apart:
//!
//! ```text
//!     try_acquire ──► granted ───────────────► total_acquired
//!          │
//!          ├────────► bucket empty ──────────► total_rejected
//!          │
//!          ├────────► lock timeout / I/O ────► total_rejected + lock_failures
//!          │
//!          └────────► corrupt / unwritable ──► total_rejected + state_errors
//! ```
//!
//! Counters are local to one handle in one process; other processes keep
//! their own.

use std::fmt;

/// Snapshot of one limiter handle's activity.
///
/// ## Example Usage
///
/// ```rust
/// use durable_rater::{FileRateLimiter, FileRateLimiterConfig};
///
/// let dir = tempfile::tempdir().unwrap();
/// let limiter = FileRateLimiter::new(
///     dir.path().join("api.ratelimit"),
///     FileRateLimiterConfig::default(),
/// ).unwrap();
/// limiter.try_acquire();
///
/// let metrics = limiter.metrics();
/// if metrics.is_degraded() {
///     eprintln!("denying because the state file is unusable:\n{}", metrics);
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FileLimiterMetrics {
    /// Requests granted.
    pub total_acquired: u64,

    /// Requests denied for any reason, including infrastructure failures.
    pub total_rejected: u64,

    /// Denials caused by a lock timeout or lock I/O error.
    pub lock_failures: u64,

    /// Denials caused by an unreadable, corrupt or unwritable state file.
    pub state_errors: u64,

    /// Tokens available when the snapshot was taken (0.0 if unreadable).
    pub current_tokens: f64,

    /// Configured bucket capacity.
    pub burst_size: u64,
}

impl FileLimiterMetrics {
    /// Fraction of requests granted, 1.0 when there were none.
    #[inline]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            1.0
        } else {
            self.total_acquired as f64 / total as f64
        }
    }

    /// Fraction of requests denied.
    #[inline]
    pub fn rejection_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }

    /// Granted plus denied.
    #[inline]
    pub fn total_requests(&self) -> u64 {
        self.total_acquired + self.total_rejected
    }

    /// Denials that were not the bucket's decision.
    #[inline]
    pub fn infrastructure_failures(&self) -> u64 {
        self.lock_failures + self.state_errors
    }

    /// Fraction of all requests denied by infrastructure failures.
    ///
    /// A waiting `acquire` can record several failures for one request, so
    /// the ratio is capped at 1.0.
    pub fn failure_ratio(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            (self.infrastructure_failures() as f64 / total as f64).min(1.0)
        }
    }

    /// Returns `true` if any denial came from a lock or state failure.
    #[inline]
    pub fn is_degraded(&self) -> bool {
        self.infrastructure_failures() > 0
    }

    /// Percentage of the bucket currently available.
    pub fn availability_percentage(&self) -> f64 {
        if self.burst_size == 0 {
            0.0
        } else {
            (self.current_tokens / self.burst_size as f64) * 100.0
        }
    }

    /// Three-level assessment of whether the limiter can do its job.
    ///
    /// ```rust
    /// use durable_rater::{FileLimiterMetrics, HealthStatus};
    ///
    /// let metrics = FileLimiterMetrics {
    ///     total_acquired: 10,
    ///     total_rejected: 30,
    ///     lock_failures: 30,
    ///     state_errors: 0,
    ///     current_tokens: 0.0,
    ///     burst_size: 5,
    /// };
    /// assert_eq!(metrics.health_status(), HealthStatus::Critical);
    /// ```
    pub fn health_status(&self) -> HealthStatus {
        if self.failure_ratio() > 0.5 {
            HealthStatus::Critical
        } else if self.is_degraded() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Human-readable report.
    ///
    /// # Example Output
    ///
    /// ```text
    /// FileRateLimiter Metrics:
    /// ├─ Decisions:
    /// │  ├─ Success Rate: 85.00%
    /// │  ├─ Rejection Rate: 15.00%
    /// │  └─ Total Requests: 100
    /// ├─ Capacity:
    /// │  ├─ Available Tokens: 2.40/5
    /// │  └─ Availability: 48.00%
    /// ├─ Failures (fail closed):
    /// │  ├─ Lock Failures: 0
    /// │  └─ State Errors: 0
    /// └─ Health: Healthy
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "FileRateLimiter Metrics:\n\
             ├─ Decisions:\n\
             │  ├─ Success Rate: {:.2}%\n\
             │  ├─ Rejection Rate: {:.2}%\n\
             │  └─ Total Requests: {}\n\
             ├─ Capacity:\n\
             │  ├─ Available Tokens: {:.2}/{}\n\
             │  └─ Availability: {:.2}%\n\
             ├─ Failures (fail closed):\n\
             │  ├─ Lock Failures: {}\n\
             │  └─ State Errors: {}\n\
             └─ Health: {:?}",
            self.success_rate() * 100.0,
            self.rejection_rate() * 100.0,
            self.total_requests(),
            self.current_tokens,
            self.burst_size,
            self.availability_percentage(),
            self.lock_failures,
            self.state_errors,
            self.health_status(),
        )
    }
}

impl fmt::Display for FileLimiterMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Health of a limiter handle's access to its shared state.
///
/// ```text
///     Healthy ──────► every decision came from the bucket
///        │
///     Degraded ─────► some requests denied by lock/state failures
///        │
///     Critical ─────► most requests denied by lock/state failures
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// No infrastructure failures observed.
    Healthy,
    /// Some requests were denied without consulting the bucket.
    Degraded,
    /// More than half of all requests were denied by failures.
    Critical,
}

impl HealthStatus {
    /// Returns true if the status indicates any problems.
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Returns a suggested action based on the health status.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Degraded => "Check state directory permissions and lock contention",
            Self::Critical => "Immediate action required: state file unusable or lock held",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(acquired: u64, rejected: u64, lock: u64, state: u64) -> FileLimiterMetrics {
        FileLimiterMetrics {
            total_acquired: acquired,
            total_rejected: rejected,
            lock_failures: lock,
            state_errors: state,
            current_tokens: 2.5,
            burst_size: 5,
        }
    }

    #[test]
    fn test_metrics_calculations() {
        let m = metrics(80, 20, 0, 0);
        assert_eq!(m.success_rate(), 0.8);
        assert!((m.rejection_rate() - 0.2).abs() < 1e-9);
        assert_eq!(m.total_requests(), 100);
        assert_eq!(m.availability_percentage(), 50.0);
        assert!(!m.is_degraded());
        assert_eq!(m.health_status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_edge_cases() {
        let m = metrics(0, 0, 0, 0);
        assert_eq!(m.success_rate(), 1.0);
        assert_eq!(m.failure_ratio(), 0.0);

        // One waiting acquire can fail many times before it is rejected
        assert_eq!(metrics(0, 1, 7, 0).failure_ratio(), 1.0);

        let empty = FileLimiterMetrics {
            burst_size: 0,
            ..m
        };
        assert_eq!(empty.availability_percentage(), 0.0);
    }

    #[test]
    fn test_health_status() {
        assert_eq!(metrics(90, 10, 1, 0).health_status(), HealthStatus::Degraded);
        assert_eq!(metrics(90, 10, 0, 1).health_status(), HealthStatus::Degraded);
        assert_eq!(metrics(10, 40, 20, 20).health_status(), HealthStatus::Critical);

        // Plain rate limiting is not a health problem
        assert_eq!(metrics(1, 99, 0, 0).health_status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_health_status_methods() {
        assert!(!HealthStatus::Healthy.is_unhealthy());
        assert!(HealthStatus::Degraded.is_unhealthy());
        assert!(HealthStatus::Critical.is_unhealthy());
        assert!(HealthStatus::Critical.suggested_action().contains("Immediate"));
        assert_eq!(HealthStatus::Degraded.to_string(), "Degraded");
    }

    #[test]
    fn test_metrics_display() {
        let m = metrics(100, 20, 3, 1);
        let display = format!("{}", m);
        assert!(display.contains("FileRateLimiter Metrics"));
        assert!(display.contains("Lock Failures: 3"));
        assert!(display.contains("State Errors: 1"));
        assert!(display.contains("Available Tokens: 2.50/5"));
    }
}
