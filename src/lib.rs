//! # Durable Rater - Cross-Process Rate Limiting and Response Caching
//!
//! Rate limits and cached responses that survive restarts and are shared by
//! every process on the machine. State lives in small files; coordination
//! uses advisory file locks and atomic renames, so there is no daemon to run.
//!
//! ## Why Files?
//!
//! An in-memory limiter forgets everything when the process exits. Short-lived
//! CLI invocations launched in a loop would each get a fresh bucket and blow
//! straight through a provider's quota. Persisting the bucket makes the limit
//! hold across runs:
//!
//! ```text
//!     Process A            state file             Process B
//!     ─────────            ──────────             ─────────
//!     lock ──────────────► [tokens 5.0]
//!     take 1               [tokens 4.0] ◄──────── lock (waits)
//!     unlock                                      take 1
//!                          [tokens 3.0]           unlock
//! ```
//!
//! ## Features
//!
//! - **Durable token bucket** - refill arithmetic on a 36-byte state record
//! - **Bounded waits** - every lock and every `acquire` has a timeout
//! - **Fails closed** - a limiter that cannot read its state denies
//! - **Content-addressed cache** - SHA-256 keys, expiry, size ceilings
//! - **Fails open** - a cache that cannot read an entry reports a miss
//! - **Path hardening** - keys are validated and paths re-checked on every access
//!
//! ## Quick Start
//!
//! ### Rate Limiting
//!
//! ```rust
//! use durable_rater::{FileRateLimiter, FileRateLimiterConfig};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let limiter = FileRateLimiter::new(
//!     dir.path().join("api.ratelimit"),
//!     FileRateLimiterConfig::new(3.0, 5),
//! )
//! .unwrap();
//!
//! if limiter.try_acquire() {
//!     println!("request allowed");
//! } else {
//!     println!("rate limited, retry in {:?}", limiter.time_until_available());
//! }
//! ```
//!
//! ### Waiting for a Token
//!
//! ```rust
//! use durable_rater::FileRateLimiterBuilder;
//! use std::time::Duration;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let limiter = FileRateLimiterBuilder::new()
//!     .state_file(dir.path().join("api.ratelimit"))
//!     .rate(10.0)
//!     .burst_size(1)
//!     .build()
//!     .unwrap();
//!
//! assert!(limiter.acquire(1, Duration::from_secs(1)));
//! assert!(limiter.acquire(1, Duration::from_secs(1))); // waits ~100ms for refill
//! ```
//!
//! ### Caching Responses
//!
//! ```rust
//! use durable_rater::{request_key, CacheConfig, ResponseCache};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let cache = ResponseCache::new(CacheConfig::new(dir.path().join("cache"))).unwrap();
//!
//! let key = request_key("Summarize this", "gpt-4", "Be brief.");
//! if cache.get(&key).unwrap().is_none() {
//!     let response = "...";
//!     cache.put(&key, response).unwrap();
//! }
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   Your Application      │
//!                    └──────────┬──────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                               │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │   Rate Limiter      │       │   Response Cache     │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • Token bucket      │       │ • SHA-256 keys       │
//!     │ • Namespace registry│       │ • Expiry + ceilings  │
//!     │ • Fails closed      │       │ • Fails open         │
//!     └──────────┬──────────┘       └───────────┬──────────┘
//!                │                               │
//!                └──────────────┬───────────────┘
//!                               │
//!                    ┌──────────▼──────────────┐
//!                    │   sync                  │
//!                    ├─────────────────────────┤
//!                    │ • FileLock              │
//!                    │ • AtomicFileWriter      │
//!                    └─────────────────────────┘
//! ```
//!
//! ## Blocking
//!
//! `FileLock::acquire` and `FileRateLimiter::acquire` block the calling
//! thread, each bounded by an explicit timeout. There are no async variants;
//! call them from a blocking context.
//!
//! ## Logging
//!
//! Degraded behavior (lock timeouts, corrupt state, cache I/O failures,
//! capacity skips) is reported through [`tracing`]. The crate never installs
//! a subscriber.
//!
//! ## Examples
//!
//! See the `demos/` directory for complete programs:
//! - `basic.rs` - Limiter and cache in one request loop
//! - `namespaces.rs` - Per-namespace limits with background cleanup

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

mod cache;
mod error;
mod rate_limiter;
mod sync;

use std::path::PathBuf;
use std::time::Duration;

// Public re-exports
pub use cache::{
    default_cache_dir, generate_key, is_valid_key, request_key, validate_key, CacheConfig,
    CacheStats, ResponseCache, DEFAULT_EXPIRATION, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_SIZE_BYTES,
    ENTRY_EXTENSION, KEY_LEN,
};
pub use error::{Error, LockError, Result};
pub use rate_limiter::{
    current_time_ms, default_state_dir, validate_namespace, BucketState, FileLimiterMetrics,
    FileRateLimiter, FileRateLimiterConfig, HealthStatus, LimiterRegistry, RegistryStats,
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_FILE_AGE, LOCK_FILE_SUFFIX, MAX_ACQUIRE_SLEEP,
    MAX_BURST_SIZE, MAX_NAMESPACES, MAX_NAMESPACE_LEN, MIN_ACQUIRE_SLEEP, STATE_FILE_EXTENSION,
    STATE_RECORD_LEN, STATE_VERSION,
};
pub use sync::{
    AtomicFileWriter, FileLock, LockMode, ScopedLockFile, DEFAULT_LOCK_TIMEOUT,
    LOCK_RETRY_INTERVAL,
};

/// A file-backed limiter wrapped in `Arc` for sharing across threads.
///
/// # Example
/// ```rust
/// use durable_rater::{FileRateLimiter, FileRateLimiterConfig, SharedFileRateLimiter};
/// use std::sync::Arc;
///
/// let dir = tempfile::tempdir().unwrap();
/// let limiter = FileRateLimiter::new(dir.path().join("s.ratelimit"), Default::default()).unwrap();
/// let shared: SharedFileRateLimiter = Arc::new(limiter);
///
/// let limiter_clone = shared.clone();
/// std::thread::spawn(move || {
///     limiter_clone.try_acquire();
/// })
/// .join()
/// .unwrap();
/// ```
pub type SharedFileRateLimiter = std::sync::Arc<FileRateLimiter>;

/// A namespace registry wrapped in `Arc`, as required by
/// [`LimiterRegistry::start_stoppable_cleanup_thread`].
pub type SharedRegistry = std::sync::Arc<LimiterRegistry>;

/// Version information for the crate. Also the default producer version
/// recorded in cache entries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
pub const MSRV: &str = "1.74.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use durable_rater::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for limiting and caching.
    //!
    //! # Example
    //! ```rust
    //! use durable_rater::prelude::*;
    //!
    //! let config = FileRateLimiterConfig::per_second(5);
    //! let status = HealthStatus::Healthy;
    //! let key = generate_key(&["prompt", "model"]);
    //! assert!(validate_key(&key).is_ok());
    //! ```

    pub use crate::{
        generate_key, request_key, validate_key, CacheConfig, CacheStats, Error,
        FileLimiterMetrics, FileRateLimiter, FileRateLimiterBuilder, FileRateLimiterConfig,
        HealthStatus, LimiterRegistry, RegistryStats, ResponseCache, Result,
        SharedFileRateLimiter, SharedRegistry,
    };
}

/// Fluent construction of a [`FileRateLimiter`].
///
/// # Example
///
/// ```rust
/// use durable_rater::FileRateLimiterBuilder;
/// use std::time::Duration;
///
/// let dir = tempfile::tempdir().unwrap();
///
/// // 60 requests per minute, bursts of 10
/// let limiter = FileRateLimiterBuilder::new()
///     .state_file(dir.path().join("minute.ratelimit"))
///     .rate(1.0)
///     .burst_size(10)
///     .lock_timeout(Duration::from_secs(1))
///     .build()
///     .unwrap();
/// assert!(limiter.try_acquire_n(10));
///
/// // Invalid settings are reported at build time
/// let result = FileRateLimiterBuilder::new()
///     .state_file(dir.path().join("bad.ratelimit"))
///     .burst_size(0)
///     .build();
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct FileRateLimiterBuilder {
    state_file: Option<PathBuf>,
    config: FileRateLimiterConfig,
}

impl FileRateLimiterBuilder {
    /// Creates a builder with the default configuration.
    ///
    /// Default configuration:
    /// - 3 tokens per second
    /// - burst of 5
    /// - 5 second lock timeout
    /// - `<default_state_dir>/default.ratelimit`
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the state file shared by every process using this bucket.
    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    /// Sets the refill rate in tokens per second.
    pub fn rate(mut self, rate: f64) -> Self {
        self.config.rate = rate;
        self
    }

    /// Sets the bucket capacity.
    pub fn burst_size(mut self, burst_size: u64) -> Self {
        self.config.burst_size = burst_size;
        self
    }

    /// Sets how long a single attempt may wait for the cross-process lock.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Builds the limiter.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for an invalid configuration or when no
    /// state file was given and no default directory exists;
    /// [`Error::Io`] if the state directory cannot be created.
    pub fn build(self) -> Result<FileRateLimiter> {
        self.config.validate().map_err(Error::InvalidConfig)?;
        let state_file = match self.state_file {
            Some(path) => path,
            None => default_state_dir()?.join(format!("default.{}", STATE_FILE_EXTENSION)),
        };
        FileRateLimiter::new(state_file, self.config)
    }
}
