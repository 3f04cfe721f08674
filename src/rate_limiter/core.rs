//! # Core Rate Limiter Implementation
//!
//! A token bucket whose state lives in a file, so every process (and every
//! thread holding its own handle) on the machine draws from the same bucket.
//!
//! ## Lifecycle of a Request
//!
//! ```text
//!     try_acquire_n(n)
//!          │
//!          ▼
//!     lock <state>.lock (exclusive, ≤ lock_timeout) ──timeout──► ❌ deny
//!          │
//!          ▼
//!     read <state> ── missing/empty ──► full bucket
//!          │  corrupt ─────────────────────────────────────────► ❌ deny
//!          ▼
//!     refill: tokens = min(burst, tokens + elapsed_s × rate)
//!          │
//!     tokens ≥ n? ──no──────────────────────────────────────────► ❌ deny
//!          │ yes                                   (nothing written)
//!          ▼
//!     tokens -= n, atomic rewrite of <state> ──error──────────► ❌ deny
//!          │
//!          ▼
//!     unlock ──► ✅ grant
//! ```
//!
//! ## Why a Sidecar Lock File
//!
//! Every write replaces the state file by rename, which gives it a new inode.
//! A lock held on the old inode would not exclude a process that opened the
//! new one, so the lock lives on a separate `<state>.lock` file that is never
//! replaced.
//!
//! ## Failure Policy
//!
//! The limiter fails closed: lock timeouts, I/O errors and corrupt state all
//! deny the request. A corrupt file keeps denying until [`reset`] rewrites it.
//!
//! [`reset`]: FileRateLimiter::reset

use super::{
    config::{duration_from_secs, FileRateLimiterConfig, STATE_FILE_EXTENSION},
    metrics::FileLimiterMetrics,
    state::BucketState,
    utils::{current_time_ms, is_stale},
};
use crate::error::{Error, Result};
use crate::sync::{sibling_with_suffix, AtomicFileWriter, FileLock};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest single sleep inside [`FileRateLimiter::acquire`].
pub const MAX_ACQUIRE_SLEEP: Duration = Duration::from_millis(100);

/// Sleep used by [`FileRateLimiter::acquire`] when the computed wait is zero.
pub const MIN_ACQUIRE_SLEEP: Duration = Duration::from_millis(10);

/// Suffix of the sidecar file that carries the advisory lock.
pub const LOCK_FILE_SUFFIX: &str = ".lock";

/// Result of one locked read-modify-write.
enum Attempt {
    Granted,
    /// Bucket too low; holds the time until `n` tokens accrue.
    Empty(Duration),
    Failed,
}

/// Cross-process token bucket backed by a state file.
///
/// Handles are cheap and independent: two handles on the same path, in one
/// process or in two, share a single bucket. A handle can be shared between
/// threads behind an `Arc`.
///
/// ## Example
///
/// ```rust
/// use durable_rater::{FileRateLimiter, FileRateLimiterConfig};
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("openai.ratelimit");
///
/// let limiter = FileRateLimiter::new(&path, FileRateLimiterConfig::new(3.0, 5)).unwrap();
/// for _ in 0..5 {
///     assert!(limiter.try_acquire());
/// }
/// assert!(!limiter.try_acquire());
///
/// // A second handle sees the same empty bucket
/// let other = FileRateLimiter::new(&path, FileRateLimiterConfig::new(3.0, 5)).unwrap();
/// assert!(other.available_tokens() < 1.0);
/// ```
pub struct FileRateLimiter {
    state_file: PathBuf,
    lock_file: PathBuf,
    config: FileRateLimiterConfig,

    total_acquired: AtomicU64,
    total_rejected: AtomicU64,
    lock_failures: AtomicU64,
    state_errors: AtomicU64,
}

impl FileRateLimiter {
    /// Creates a handle on `state_file`.
    ///
    /// The parent directory is created; the state file itself is created
    /// lazily by the first successful acquisition.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if `config` fails validation,
    /// [`Error::Io`] if the parent directory cannot be created.
    pub fn new(state_file: impl AsRef<Path>, config: FileRateLimiterConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidConfig)?;

        let state_file = state_file.as_ref().to_path_buf();
        if let Some(parent) = state_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let lock_file = sibling_with_suffix(&state_file, LOCK_FILE_SUFFIX);

        debug!(
            "Rate limiter on {} (rate {}/s, burst {})",
            state_file.display(),
            config.rate,
            config.burst_size
        );

        Ok(Self {
            state_file,
            lock_file,
            config,
            total_acquired: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            lock_failures: AtomicU64::new(0),
            state_errors: AtomicU64::new(0),
        })
    }

    /// Attempts to take one token without waiting for refill.
    ///
    /// Blocks at most `lock_timeout` for the cross-process lock.
    ///
    /// # Returns
    ///
    /// - `true` if a token was taken
    /// - `false` if the bucket is empty or the state could not be consulted
    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_n(1)
    }

    /// Attempts to take `n` tokens atomically: all of them or none.
    ///
    /// `n == 0` always succeeds without touching the file. `n` larger than
    /// the burst size can never succeed and is denied immediately.
    ///
    /// ```rust
    /// use durable_rater::{FileRateLimiter, FileRateLimiterConfig};
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let limiter = FileRateLimiter::new(
    ///     dir.path().join("bulk.ratelimit"),
    ///     FileRateLimiterConfig::new(1.0, 10),
    /// ).unwrap();
    ///
    /// assert!(limiter.try_acquire_n(7));
    /// assert!(!limiter.try_acquire_n(5)); // only 3 left, none taken
    /// assert!(limiter.try_acquire_n(3));
    /// ```
    pub fn try_acquire_n(&self, n: u64) -> bool {
        if n == 0 {
            return true;
        }
        if n > self.config.burst_size {
            debug!(
                "Request for {} tokens exceeds burst size {} of {}",
                n,
                self.config.burst_size,
                self.state_file.display()
            );
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        match self.attempt(n, self.config.lock_timeout) {
            Attempt::Granted => {
                self.total_acquired.fetch_add(1, Ordering::Relaxed);
                true
            }
            Attempt::Empty(_) | Attempt::Failed => {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Waits until `n` tokens can be taken or `max_wait` elapses.
    ///
    /// Between attempts the thread sleeps for the time the bucket needs to
    /// accrue `n` tokens, capped at [`MAX_ACQUIRE_SLEEP`] so that tokens
    /// released by other processes' refills are noticed, and never past the
    /// deadline. `Duration::ZERO` waits without bound.
    ///
    /// Returns `false` only when the deadline passes, or immediately when
    /// `n` exceeds the burst size.
    pub fn acquire(&self, n: u64, max_wait: Duration) -> bool {
        if n == 0 {
            return true;
        }
        if n > self.config.burst_size {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let deadline = if max_wait.is_zero() {
            None
        } else {
            Instant::now().checked_add(max_wait)
        };

        loop {
            let lock_timeout = match deadline {
                Some(deadline) => self
                    .config
                    .lock_timeout
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => self.config.lock_timeout,
            };

            let wait = match self.attempt(n, lock_timeout) {
                Attempt::Granted => {
                    self.total_acquired.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Attempt::Empty(wait) => wait,
                Attempt::Failed => MAX_ACQUIRE_SLEEP,
            };

            let mut sleep = wait.min(MAX_ACQUIRE_SLEEP);
            if sleep.is_zero() {
                sleep = MIN_ACQUIRE_SLEEP;
            }
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    debug!(
                        "Gave up waiting {:?} for {} tokens on {}",
                        max_wait,
                        n,
                        self.state_file.display()
                    );
                    self.total_rejected.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                sleep = sleep.min(remaining);
            }
            thread::sleep(sleep);
        }
    }

    /// Tokens available right now, refill included, without taking any.
    ///
    /// Takes a shared lock so it never observes a half-applied update.
    /// Returns `0.0` if the state cannot be read.
    pub fn available_tokens(&self) -> f64 {
        match self.peek() {
            Ok(state) => state.tokens,
            Err(err) => {
                debug!("Cannot read {}: {}", self.state_file.display(), err);
                0.0
            }
        }
    }

    /// Time until at least one token will be available (zero if one is).
    pub fn time_until_available(&self) -> Duration {
        let available = self.available_tokens();
        duration_from_secs((1.0 - available) / self.config.rate)
    }

    /// Empties the bucket, stamping it with the current time.
    ///
    /// Also the way to recover a corrupt state file: the old contents are
    /// not required to parse.
    ///
    /// # Errors
    ///
    /// [`Error::LockTimeout`] or [`Error::Io`] if the state could not be
    /// written.
    pub fn reset(&self) -> Result<()> {
        let _lock = FileLock::exclusive(&self.lock_file, self.config.lock_timeout)?;

        let now = current_time_ms();
        let last_update_ms = match self.load() {
            Ok(Some(previous)) => previous.last_update_ms.max(now),
            _ => now,
        };
        let state = BucketState {
            tokens: 0.0,
            last_update_ms,
            ..BucketState::full(self.config.rate, self.config.burst_size, now)
        };
        self.persist(&state)?;

        info!("Reset rate limiter state {}", self.state_file.display());
        Ok(())
    }

    /// Deletes `*.ratelimit` files in `dir` not modified for longer than
    /// `max_age`. Returns how many state files were removed.
    ///
    /// A file whose lock is currently held is skipped. Lock sidecars are
    /// never deleted, so every handle keeps contending on the same inode.
    /// A missing directory yields 0; per-file errors are logged and skipped.
    pub fn cleanup_stale_files(dir: impl AsRef<Path>, max_age: Duration) -> usize {
        let dir = dir.as_ref();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    warn!("Cannot scan {} for stale state: {}", dir.display(), err);
                }
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_state_file = path.extension().and_then(|e| e.to_str())
                == Some(STATE_FILE_EXTENSION)
                && entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_state_file || !is_stale(&path, max_age) {
                continue;
            }

            let lock_file = sibling_with_suffix(&path, LOCK_FILE_SUFFIX);
            let Ok(_lock) = FileLock::exclusive(&lock_file, Duration::ZERO) else {
                debug!("Skipping {}: in use", path.display());
                continue;
            };
            // Re-check under the lock; a writer may have just refreshed it
            if !is_stale(&path, max_age) {
                continue;
            }

            // The sidecar stays: a waiter may already have it open, and a
            // fresh sidecar at the same path would not exclude that waiter.
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!("Could not remove stale {}: {}", path.display(), err),
            }
        }

        if removed > 0 {
            info!("Removed {} stale rate limiter files from {}", removed, dir.display());
        }
        removed
    }

    /// Returns a snapshot of this handle's counters and the current bucket.
    pub fn metrics(&self) -> FileLimiterMetrics {
        FileLimiterMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            lock_failures: self.lock_failures.load(Ordering::Relaxed),
            state_errors: self.state_errors.load(Ordering::Relaxed),
            current_tokens: self.available_tokens(),
            burst_size: self.config.burst_size,
        }
    }

    /// Path of the persisted bucket.
    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Path of the sidecar lock file.
    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// Settings applied by this handle.
    pub fn config(&self) -> &FileRateLimiterConfig {
        &self.config
    }

    /// One lock-load-refill-take-persist cycle. Failures are logged and
    /// counted here; grant/deny accounting is left to the caller.
    fn attempt(&self, n: u64, lock_timeout: Duration) -> Attempt {
        let _lock = match FileLock::exclusive(&self.lock_file, lock_timeout) {
            Ok(lock) => lock,
            Err(err) => {
                warn!("Denying request, lock unavailable: {}", err);
                self.lock_failures.fetch_add(1, Ordering::Relaxed);
                return Attempt::Failed;
            }
        };

        let result = self.current_state().and_then(|mut state| {
            if state.try_take(n) {
                self.persist(&state).map(|()| Attempt::Granted)
            } else {
                let wait = duration_from_secs(state.seconds_until(n as f64));
                Ok(Attempt::Empty(wait))
            }
        });

        result.unwrap_or_else(|err| {
            warn!("Denying request, state unusable: {}", err);
            self.state_errors.fetch_add(1, Ordering::Relaxed);
            Attempt::Failed
        })
    }

    /// Reads the bucket under a shared lock and refills it in memory.
    fn peek(&self) -> Result<BucketState> {
        let _lock = FileLock::shared(&self.lock_file, self.config.lock_timeout)?;
        self.current_state()
    }

    /// Stored state brought up to now with this handle's parameters.
    /// Caller holds the lock.
    fn current_state(&self) -> Result<BucketState> {
        let now = current_time_ms();
        let mut state = self
            .load()?
            .unwrap_or_else(|| BucketState::full(self.config.rate, self.config.burst_size, now));
        state.refill(now, self.config.rate, self.config.burst_size);
        Ok(state)
    }

    /// `None` when the file is missing or empty (first use).
    fn load(&self) -> Result<Option<BucketState>> {
        match fs::read(&self.state_file) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => BucketState::decode(&bytes)
                .map(Some)
                .map_err(|reason| Error::CorruptState {
                    path: self.state_file.clone(),
                    reason,
                }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io(&self.state_file, err)),
        }
    }

    fn persist(&self, state: &BucketState) -> Result<()> {
        let mut writer = AtomicFileWriter::new(&self.state_file)?;
        writer.write(&state.encode())?;
        writer.commit()
    }
}

impl std::fmt::Debug for FileRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRateLimiter")
            .field("state_file", &self.state_file)
            .field("rate", &self.config.rate)
            .field("burst_size", &self.config.burst_size)
            .field("lock_timeout", &self.config.lock_timeout)
            .finish()
    }
}
