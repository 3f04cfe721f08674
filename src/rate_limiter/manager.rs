//! # Namespace Registry
//!
//! Maps logical namespaces ("openai", "github-api", ...) to file-backed
//! limiters that share one state directory, so that each namespace gets its
//! own cross-process bucket.
//!
//! ## Architecture
//!
//! ```text
//!     Callers:
//!     "openai" ─────┐
//!     "github" ─────┼──► LimiterRegistry ──► FileRateLimiter handles
//!     "openai" ─────┘         │
//!                       ┌──────────────┐         <state_dir>/
//!                       │  DashMap     │         ├── openai.ratelimit
//!                       │  ns → Arc<L> │ ──────► ├── openai.ratelimit.lock
//!                       │  ns → Arc<L> │         ├── github.ratelimit
//!                       └──────────────┘         └── github.ratelimit.lock
//! ```
//!
//! The map only caches handles; the buckets themselves live in the files.
//! Forgetting a handle loses nothing but its per-process metrics.
//!
//! ## Key Features
//!
//! 1. **Validated names**: a namespace becomes a file name, so it is
//!    restricted to a safe character set
//! 2. **Bounded memory**: at most [`MAX_NAMESPACES`] handles per registry
//! 3. **Stale file cleanup**: periodic removal of unused state files

use super::{
    config::{FileRateLimiterConfig, STATE_FILE_EXTENSION},
    core::FileRateLimiter,
};
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of namespaces one registry tracks at a time.
pub const MAX_NAMESPACES: usize = 1024;

/// Maximum namespace length in bytes.
pub const MAX_NAMESPACE_LEN: usize = 64;

/// Default interval between background cleanups.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default age after which an untouched state file is removed.
pub const DEFAULT_MAX_FILE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Checks that `namespace` is safe to use as a file name stem.
///
/// Allowed: 1 to 64 ASCII letters, digits, `_`, `-` or `.`, not starting with
/// `.` (no hidden files, no `..`).
///
/// ```rust
/// use durable_rater::validate_namespace;
///
/// assert!(validate_namespace("openai.chat-v1").is_ok());
/// assert!(validate_namespace("../etc").is_err());
/// assert!(validate_namespace("").is_err());
/// ```
pub fn validate_namespace(namespace: &str) -> Result<()> {
    let valid = !namespace.is_empty()
        && namespace.len() <= MAX_NAMESPACE_LEN
        && !namespace.starts_with('.')
        && namespace
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidKey(format!("invalid namespace {:?}", namespace)))
    }
}

/// Registry of per-namespace file-backed rate limiters.
///
/// ## Usage
///
/// ```rust
/// use durable_rater::{FileRateLimiterConfig, LimiterRegistry};
///
/// let dir = tempfile::tempdir().unwrap();
/// let registry = LimiterRegistry::new(dir.path(), FileRateLimiterConfig::new(1.0, 2));
///
/// assert!(registry.try_acquire("openai"));
/// assert!(registry.try_acquire("openai"));
/// assert!(!registry.try_acquire("openai"));
///
/// // Other namespaces have their own bucket
/// assert!(registry.try_acquire("github"));
/// ```
///
/// ### With Automatic Cleanup
///
/// ```rust
/// use durable_rater::{FileRateLimiterConfig, LimiterRegistry};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let dir = tempfile::tempdir().unwrap();
/// let registry = Arc::new(LimiterRegistry::with_cleanup_settings(
///     dir.path(),
///     FileRateLimiterConfig::default(),
///     Duration::from_secs(60),       // sweep every minute
///     Duration::from_secs(60 * 60),  // drop files untouched for an hour
/// ));
///
/// let (handle, stop_tx) = registry.clone().start_stoppable_cleanup_thread().unwrap();
/// stop_tx.send(()).unwrap();
/// handle.join().unwrap();
/// ```
pub struct LimiterRegistry {
    /// Namespace to handle mappings.
    limiters: DashMap<String, Arc<FileRateLimiter>, ahash::RandomState>,

    /// Tracked handle count, for capacity checks without locking shards.
    active_count: AtomicUsize,

    /// Directory holding `<namespace>.ratelimit` files.
    state_dir: PathBuf,

    /// Settings for every handle created by this registry.
    config: FileRateLimiterConfig,

    cleanup_interval: Duration,
    max_file_age: Duration,

    total_created: AtomicU64,
    total_files_cleaned: AtomicU64,
    total_forgotten: AtomicU64,

    /// Prevents overlapping cleanups.
    cleanup_in_progress: AtomicBool,
}

impl LimiterRegistry {
    /// Creates a registry with hourly cleanup of day-old state files.
    pub fn new(state_dir: impl AsRef<Path>, config: FileRateLimiterConfig) -> Self {
        Self::with_cleanup_settings(state_dir, config, DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_FILE_AGE)
    }

    /// Creates a registry with custom cleanup settings.
    ///
    /// * `cleanup_interval` - how often the background thread sweeps
    /// * `max_file_age` - state files untouched for longer are deleted
    pub fn with_cleanup_settings(
        state_dir: impl AsRef<Path>,
        config: FileRateLimiterConfig,
        cleanup_interval: Duration,
        max_file_age: Duration,
    ) -> Self {
        let num_shards = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8)
            .next_power_of_two()
            .clamp(2, 64);

        Self {
            limiters: DashMap::with_capacity_and_hasher_and_shard_amount(
                64,
                ahash::RandomState::new(),
                num_shards,
            ),
            active_count: AtomicUsize::new(0),
            state_dir: state_dir.as_ref().to_path_buf(),
            config,
            cleanup_interval,
            max_file_age,
            total_created: AtomicU64::new(0),
            total_files_cleaned: AtomicU64::new(0),
            total_forgotten: AtomicU64::new(0),
            cleanup_in_progress: AtomicBool::new(false),
        }
    }

    /// Gets or creates the limiter for `namespace`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidKey`] if the name fails [`validate_namespace`]
    /// - [`Error::InvalidConfig`] if the registry is full or the config is
    ///   invalid
    /// - [`Error::Io`] if the state directory cannot be created
    pub fn get_limiter(&self, namespace: &str) -> Result<Arc<FileRateLimiter>> {
        if let Some(limiter) = self.limiters.get(namespace) {
            return Ok(limiter.clone());
        }

        validate_namespace(namespace)?;

        if self.active_count.load(Ordering::Acquire) >= MAX_NAMESPACES {
            warn!("Namespace capacity reached, rejecting {:?}", namespace);
            return Err(Error::InvalidConfig("namespace capacity reached"));
        }

        match self.limiters.entry(namespace.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let prev = self.active_count.fetch_add(1, Ordering::AcqRel);
                if prev >= MAX_NAMESPACES {
                    self.active_count.fetch_sub(1, Ordering::AcqRel);
                    warn!("Namespace capacity race detected, rejecting {:?}", namespace);
                    return Err(Error::InvalidConfig("namespace capacity reached"));
                }

                let limiter = match FileRateLimiter::new(self.state_path(namespace), self.config.clone())
                {
                    Ok(limiter) => Arc::new(limiter),
                    Err(err) => {
                        self.active_count.fetch_sub(1, Ordering::AcqRel);
                        return Err(err);
                    }
                };
                vacant.insert(limiter.clone());

                self.total_created.fetch_add(1, Ordering::Relaxed);
                debug!("Created limiter for namespace {:?} (total: {})", namespace, prev + 1);
                Ok(limiter)
            }
        }
    }

    /// Takes one token from `namespace`. Invalid namespaces are denied.
    #[inline]
    pub fn try_acquire(&self, namespace: &str) -> bool {
        self.try_acquire_n(namespace, 1)
    }

    /// Takes `n` tokens from `namespace`. Invalid namespaces are denied.
    pub fn try_acquire_n(&self, namespace: &str, n: u64) -> bool {
        match self.get_limiter(namespace) {
            Ok(limiter) => limiter.try_acquire_n(n),
            Err(err) => {
                debug!("Denying request: {}", err);
                false
            }
        }
    }

    /// Waits up to `max_wait` for `n` tokens from `namespace`; see
    /// [`FileRateLimiter::acquire`].
    pub fn acquire(&self, namespace: &str, n: u64, max_wait: Duration) -> bool {
        match self.get_limiter(namespace) {
            Ok(limiter) => limiter.acquire(n, max_wait),
            Err(err) => {
                debug!("Denying request: {}", err);
                false
            }
        }
    }

    /// Deletes stale state files and forgets handles whose file is gone.
    ///
    /// Returns the number of state files removed. Overlapping calls return
    /// 0 immediately.
    pub fn cleanup(&self) -> usize {
        if self
            .cleanup_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }
        let _guard = CleanupGuard {
            flag: &self.cleanup_in_progress,
        };

        let removed = FileRateLimiter::cleanup_stale_files(&self.state_dir, self.max_file_age);
        self.total_files_cleaned
            .fetch_add(removed as u64, Ordering::Relaxed);

        let mut forgotten = 0;
        self.limiters.retain(|namespace, limiter| {
            if limiter.state_file().exists() {
                true
            } else {
                debug!("Forgetting limiter for namespace {:?}", namespace);
                forgotten += 1;
                self.active_count.fetch_sub(1, Ordering::AcqRel);
                false
            }
        });

        if forgotten > 0 {
            self.total_forgotten.fetch_add(forgotten, Ordering::Relaxed);
            debug!("Cleanup forgot {} limiter handles", forgotten);
        }

        let len = self.limiters.len();
        if self.limiters.capacity() > len.saturating_mul(4).max(256) {
            self.limiters.shrink_to_fit();
        }

        removed
    }

    /// Number of namespaces with a live handle.
    #[inline]
    pub fn active_namespaces(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    /// Directory holding the state files.
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Returns registry statistics.
    pub fn stats(&self) -> RegistryStats {
        let active = self.active_namespaces();
        RegistryStats {
            active_namespaces: active,
            total_created: self.total_created.load(Ordering::Relaxed),
            total_files_cleaned: self.total_files_cleaned.load(Ordering::Relaxed),
            total_forgotten: self.total_forgotten.load(Ordering::Relaxed),
            capacity_used: active as f64 / MAX_NAMESPACES as f64,
            max_capacity: MAX_NAMESPACES,
        }
    }

    /// Runs [`cleanup`](Self::cleanup) every `cleanup_interval` until a
    /// message arrives on (or the drop of) the returned sender.
    ///
    /// # Errors
    ///
    /// Fails if the OS refuses to spawn the thread.
    pub fn start_stoppable_cleanup_thread(
        self: Arc<Self>,
    ) -> io::Result<(thread::JoinHandle<()>, mpsc::Sender<()>)> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let registry = self;

        let handle = thread::Builder::new()
            .name("durable-rater-cleanup".to_string())
            .spawn(move || {
                info!(
                    "Started cleanup thread for {} (interval: {:?}, max age: {:?})",
                    registry.state_dir.display(),
                    registry.cleanup_interval,
                    registry.max_file_age
                );

                loop {
                    match stop_rx.recv_timeout(registry.cleanup_interval) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                            info!("Cleanup thread stopping");
                            break;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            registry.cleanup();

                            let active = registry.active_namespaces();
                            if active > MAX_NAMESPACES * 9 / 10 {
                                warn!(
                                    "High namespace usage: {} active limiters ({}% of capacity)",
                                    active,
                                    (active * 100) / MAX_NAMESPACES
                                );
                            }
                        }
                    }
                }
            })?;

        Ok((handle, stop_tx))
    }

    /// Forgets every handle. State files are left alone.
    pub fn clear(&self) {
        let count = self.limiters.len();
        self.limiters.clear();
        self.active_count.store(0, Ordering::Release);
        self.total_forgotten
            .fetch_add(count as u64, Ordering::Relaxed);
        info!("Cleared all {} limiter handles", count);
    }

    fn state_path(&self, namespace: &str) -> PathBuf {
        self.state_dir
            .join(format!("{}.{}", namespace, STATE_FILE_EXTENSION))
    }
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("state_dir", &self.state_dir)
            .field("active_namespaces", &self.active_namespaces())
            .field("cleanup_interval", &self.cleanup_interval)
            .field("max_file_age", &self.max_file_age)
            .finish()
    }
}

/// Resets the cleanup flag on every exit path.
struct CleanupGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Statistics for a [`LimiterRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Namespaces with a live handle.
    pub active_namespaces: usize,

    /// Handles created since startup.
    pub total_created: u64,

    /// Stale state files deleted by cleanup since startup.
    pub total_files_cleaned: u64,

    /// Handles dropped by cleanup or `clear` since startup.
    pub total_forgotten: u64,

    /// Fraction of capacity in use (0.0 to 1.0).
    pub capacity_used: f64,

    /// Maximum number of namespaces.
    pub max_capacity: usize,
}

impl RegistryStats {
    /// Returns a human-readable summary.
    ///
    /// ```text
    /// Limiter Registry Stats:
    /// ├─ Capacity:
    /// │  ├─ Active Namespaces: 3/1024
    /// │  └─ Capacity Used: 0.29%
    /// └─ Lifetime:
    ///    ├─ Total Created: 5
    ///    ├─ Handles Forgotten: 2
    ///    └─ Files Cleaned: 2
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "Limiter Registry Stats:\n\
             ├─ Capacity:\n\
             │  ├─ Active Namespaces: {}/{}\n\
             │  └─ Capacity Used: {:.2}%\n\
             └─ Lifetime:\n\
                ├─ Total Created: {}\n\
                ├─ Handles Forgotten: {}\n\
                └─ Files Cleaned: {}",
            self.active_namespaces,
            self.max_capacity,
            self.capacity_used * 100.0,
            self.total_created,
            self.total_forgotten,
            self.total_files_cleaned,
        )
    }

    /// Returns `true` above 80% of capacity.
    pub fn is_near_capacity(&self) -> bool {
        self.capacity_used > 0.8
    }
}

impl std::fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary())
    }
}
