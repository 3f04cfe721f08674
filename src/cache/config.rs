//! Response cache settings.

use crate::error::{Error, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default entry lifetime.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default ceiling on the number of entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Default ceiling on the total size of all entry files.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Configuration for a [`ResponseCache`](crate::ResponseCache).
///
/// ```rust
/// use durable_rater::CacheConfig;
///
/// let dir = tempfile::tempdir().unwrap();
/// let config = CacheConfig::new(dir.path().join("cache"))
///     .with_expiration_hours(6)
///     .with_max_entries(500);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Directory holding one `<key>.json` file per entry.
    pub cache_dir: PathBuf,

    /// Entries older than this are misses and get swept by `clean_expired`.
    pub expiration: Duration,

    /// `put` is skipped while this many entries exist.
    pub max_entries: usize,

    /// `put` is skipped while the entry files total more than this many bytes.
    pub max_size_bytes: u64,

    /// Recorded in every entry as the version of the producing program.
    pub producer_version: String,
}

impl CacheConfig {
    /// Default limits rooted at `cache_dir`.
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            expiration: DEFAULT_EXPIRATION,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            producer_version: crate::VERSION.to_string(),
        }
    }

    /// Default limits rooted at [`default_cache_dir`].
    pub fn from_default_dir() -> Result<Self> {
        default_cache_dir().map(Self::new)
    }

    /// Sets the entry lifetime in whole hours.
    pub fn with_expiration_hours(self, hours: u64) -> Self {
        self.with_expiration(Duration::from_secs(hours.saturating_mul(60 * 60)))
    }

    /// Sets the entry lifetime.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Sets the entry count ceiling.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets the total size ceiling.
    pub fn with_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    /// Sets the version string stored with each entry.
    pub fn with_producer_version(mut self, version: impl Into<String>) -> Self {
        self.producer_version = version.into();
        self
    }

    /// Checks that the limits are usable.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err("cache_dir must not be empty");
        }
        if self.expiration.is_zero() {
            return Err("expiration must be greater than 0");
        }
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0");
        }
        if self.max_size_bytes == 0 {
            return Err("max_size_bytes must be greater than 0");
        }
        Ok(())
    }
}

/// Per-user cache directory (`~/.cache/durable-rater/responses` on Linux).
///
/// # Errors
///
/// [`Error::InvalidConfig`] when no home directory can be determined.
pub fn default_cache_dir() -> Result<PathBuf> {
    ProjectDirs::from("", "", env!("CARGO_PKG_NAME"))
        .map(|dirs| dirs.cache_dir().join("responses"))
        .ok_or(Error::InvalidConfig("no home directory for default cache dir"))
}
