//! # Utility Functions (utils.rs)
//!
//! Time and file-age helpers shared by the limiter and the registry.
//!
//! ## Clocks
//!
//! ```text
//!     Process A ──┐
//!                 ├──► state file: last_update_ms (wall clock, epoch ms)
//!     Process B ──┘
//! ```
//!
//! Timestamps are persisted and compared across processes, so they come
//! from the wall clock rather than a per-process monotonic anchor. Clock
//! steps backwards are absorbed by the refill rule, which treats a
//! non-positive elapsed time as zero.

use std::fs::Metadata;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time in milliseconds since UNIX epoch.
///
/// A clock set before 1970 reads as 0.
///
/// # Example
///
/// ```rust
/// use durable_rater::current_time_ms;
///
/// let now = current_time_ms();
/// assert!(now > 0);
/// ```
#[inline]
pub fn current_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Time since the file was last modified, or `None` when the platform does
/// not report it. A modification time in the future counts as age zero.
pub(crate) fn modified_age(metadata: &Metadata) -> Option<Duration> {
    let modified = metadata.modified().ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

/// Returns `true` if the file at `path` was last modified more than
/// `max_age` ago. Unreadable metadata is never considered stale.
pub(crate) fn is_stale(path: &Path, max_age: Duration) -> bool {
    std::fs::metadata(path)
        .ok()
        .and_then(|m| modified_age(&m))
        .map(|age| age > max_age)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_current_time_ms() {
        let a = current_time_ms();
        std::thread::sleep(Duration::from_millis(5));
        let b = current_time_ms();
        assert!(a > 1_600_000_000_000, "clock should be past 2020");
        assert!(b >= a);
    }

    #[test]
    fn test_fresh_file_is_not_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh");
        std::fs::write(&path, b"x").unwrap();

        assert!(!is_stale(&path, Duration::from_secs(60)));
        let age = modified_age(&std::fs::metadata(&path).unwrap()).unwrap();
        assert!(age < Duration::from_secs(60));
    }

    #[test]
    fn test_zero_max_age_marks_file_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old");
        std::fs::write(&path, b"x").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert!(is_stale(&path, Duration::ZERO));
    }

    #[test]
    fn test_missing_file_is_not_stale() {
        let dir = tempdir().unwrap();
        assert!(!is_stale(&dir.path().join("missing"), Duration::ZERO));
    }
}
