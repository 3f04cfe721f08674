//! # Response Cache
//!
//! One JSON file per entry, named after its key:
//!
//! ```text
//!     <cache_dir>/                      (mode 0700 on Unix)
//!     ├── 3f2a…e1.json   { "payload": "<base64>", "stored_at": 1718000000,
//!     │                    "producer_version": "0.1.0" }
//!     └── 9b07…4c.json
//! ```
//!
//! The cache is advisory. Read failures are misses and write failures are
//! dropped; only malformed keys and path escapes are reported, since those
//! point at a bug in the caller. Every access re-validates the key and
//! re-resolves the path against the canonical cache root.
//!
//! Entry count and total size come from a directory scan on each `put` and
//! `get_stats`, which is linear in the number of entries.
//!
//! Expiry is decided by the entry file's modification time. `stored_at` is
//! recorded for inspection only and is never read back.

use super::config::CacheConfig;
use super::key::{is_valid_key, validate_key};
use crate::error::{Error, Result};
use crate::rate_limiter::current_time_ms;
use crate::sync::AtomicFileWriter;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// File extension of entry files.
pub const ENTRY_EXTENSION: &str = "json";

/// On-disk entry document.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// Base64 of the stored bytes.
    payload: String,
    /// Unix seconds at write time. Informational; expiry uses the mtime.
    stored_at: u64,
    producer_version: String,
}

/// Content-addressed store for response payloads.
///
/// ```rust
/// use durable_rater::{request_key, CacheConfig, ResponseCache};
///
/// let dir = tempfile::tempdir().unwrap();
/// let cache = ResponseCache::new(CacheConfig::new(dir.path().join("cache"))).unwrap();
///
/// let key = request_key("What is 2+2?", "gpt-4", "");
/// assert_eq!(cache.get(&key).unwrap(), None);
///
/// cache.put(&key, "4").unwrap();
/// assert_eq!(cache.get_string(&key).unwrap().as_deref(), Some("4"));
///
/// // Keys are validated before touching the filesystem
/// assert!(cache.get("../../etc/passwd").is_err());
/// ```
pub struct ResponseCache {
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Opens (creating if needed) the cache directory and restricts it to
    /// the owner on Unix.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for invalid limits; [`Error::Io`] if the
    /// directory cannot be created or its permissions cannot be set.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidConfig)?;

        let dir = &config.cache_dir;
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        restrict_permissions(dir)?;

        debug!(
            "Response cache at {} (expiration {:?}, max {} entries)",
            dir.display(),
            config.expiration,
            config.max_entries
        );

        Ok(Self {
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Opens a cache with default limits in [`default_cache_dir`](crate::default_cache_dir).
    pub fn with_defaults() -> Result<Self> {
        Self::new(CacheConfig::from_default_dir()?)
    }

    /// Resolves `key` to its entry path, checking that it stays inside the
    /// cache root.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidKey`] unless `key` is 64 lowercase hex characters
    /// - [`Error::Security`] if the resolved location leaves the root or the
    ///   entry is a symlink
    /// - [`Error::Io`] if the root cannot be resolved
    pub fn get_cache_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;

        let root = &self.config.cache_dir;
        let candidate = root.join(format!("{}.{}", key, ENTRY_EXTENSION));

        let canonical_root = fs::canonicalize(root).map_err(|e| Error::io(root, e))?;
        let parent = candidate.parent().unwrap_or(root);
        let canonical_parent = fs::canonicalize(parent).map_err(|e| Error::io(parent, e))?;

        if !canonical_parent.starts_with(&canonical_root) {
            warn!(
                "Cache path escape: {} resolves outside {}",
                candidate.display(),
                canonical_root.display()
            );
            return Err(Error::Security(format!(
                "cache entry for {} resolves outside the cache root",
                key
            )));
        }

        if let Ok(meta) = fs::symlink_metadata(&candidate) {
            if meta.file_type().is_symlink() {
                warn!("Refusing symlinked cache entry {}", candidate.display());
                return Err(Error::Security(format!(
                    "cache entry for {} is a symbolic link",
                    key
                )));
            }
        }

        Ok(candidate)
    }

    /// Returns `true` if an unexpired entry exists for `key`.
    pub fn has_valid_cache(&self, key: &str) -> Result<bool> {
        Ok(match self.resolve(key)? {
            Some(path) => self.is_fresh(&path),
            None => false,
        })
    }

    /// Returns the payload stored under `key`, or `None` on a miss.
    ///
    /// Missing, expired and unreadable entries are all misses.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let payload = match self.resolve(key)? {
            Some(path) if self.is_fresh(&path) => read_entry(&path),
            _ => None,
        };

        match &payload {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(payload)
    }

    /// [`get`](Self::get) for text payloads. Non-UTF-8 payloads are misses.
    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key)?.and_then(|bytes| match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                debug!("Cached payload for {} is not UTF-8", key);
                None
            }
        }))
    }

    /// Stores `payload` under `key`, replacing any previous entry.
    ///
    /// When the cache is at its entry or size ceiling, expired entries are
    /// swept first; if it is still full the write is skipped. I/O failures
    /// are logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Only [`Error::InvalidKey`] and [`Error::Security`].
    pub fn put(&self, key: &str, payload: impl AsRef<[u8]>) -> Result<()> {
        let Some(path) = self.resolve(key)? else {
            return Ok(());
        };

        let (mut entries, mut size_bytes) = self.scan();
        if self.over_capacity(entries, size_bytes) {
            info!("Cache full ({} entries, {} bytes), cleaning expired entries", entries, size_bytes);
            self.clean_expired();
            (entries, size_bytes) = self.scan();
            if self.over_capacity(entries, size_bytes) {
                warn!("Cache at capacity, skipping write for {}", key);
                return Ok(());
            }
        }

        let entry = CacheEntry {
            payload: BASE64.encode(payload.as_ref()),
            stored_at: u64::try_from(current_time_ms() / 1000).unwrap_or(0),
            producer_version: self.config.producer_version.clone(),
        };

        if let Err(err) = write_entry(&path, &entry) {
            warn!("Failed to write cache entry {}: {}", key, err);
        } else {
            debug!("Cached response with key: {}", key);
        }
        Ok(())
    }

    /// Removes every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = self.remove_entries(|_| true);
        info!("Cleared {} cache entries", removed);
        removed
    }

    /// Removes entries older than the expiration. Returns how many.
    pub fn clean_expired(&self) -> usize {
        let removed = self.remove_entries(|meta| !self.is_fresh_meta(meta));
        if removed > 0 {
            info!("Removed {} expired cache entries", removed);
        }
        removed
    }

    /// Hit/miss counters for this handle plus a scan of the directory.
    pub fn get_stats(&self) -> CacheStats {
        let (entries, size_bytes) = self.scan();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
            size_bytes,
        }
    }

    /// Directory holding the entries.
    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Settings in effect.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Path for `key`, `Ok(None)` when the root is unusable (logged, treated
    /// as a miss), `Err` only for caller errors.
    fn resolve(&self, key: &str) -> Result<Option<PathBuf>> {
        match self.get_cache_path(key) {
            Ok(path) => Ok(Some(path)),
            Err(err) if err.is_caller_error() => Err(err),
            Err(err) => {
                warn!("Cache unavailable: {}", err);
                Ok(None)
            }
        }
    }

    fn is_fresh(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(meta) => meta.is_file() && self.is_fresh_meta(&meta),
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    warn!("Cannot stat cache entry {}: {}", path.display(), err);
                }
                false
            }
        }
    }

    /// Fresh while age <= expiration. Unknown modification times count as
    /// expired.
    fn is_fresh_meta(&self, meta: &fs::Metadata) -> bool {
        meta.modified()
            .map(|modified| {
                SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO)
                    <= self.config.expiration
            })
            .unwrap_or(false)
    }

    fn over_capacity(&self, entries: usize, size_bytes: u64) -> bool {
        entries >= self.config.max_entries || size_bytes > self.config.max_size_bytes
    }

    /// Entry count and total size of entry files.
    fn scan(&self) -> (usize, u64) {
        let mut entries = 0;
        let mut size_bytes = 0;
        for (_, meta) in self.entry_files() {
            entries += 1;
            size_bytes += meta.len();
        }
        (entries, size_bytes)
    }

    fn remove_entries(&self, mut should_remove: impl FnMut(&fs::Metadata) -> bool) -> usize {
        let mut removed = 0;
        for (path, meta) in self.entry_files() {
            if !should_remove(&meta) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!("Failed to remove cache entry {}: {}", path.display(), err),
            }
        }
        removed
    }

    /// Regular files named `<64 lowercase hex>.json` directly in the root.
    fn entry_files(&self) -> Vec<(PathBuf, fs::Metadata)> {
        let dir = &self.config.cache_dir;
        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(err) => {
                warn!("Failed to scan cache {}: {}", dir.display(), err);
                return Vec::new();
            }
        };

        read_dir
            .flatten()
            .filter(|entry| {
                let name = entry.file_name();
                name.to_str()
                    .and_then(|n| n.strip_suffix(".json"))
                    .map(is_valid_key)
                    .unwrap_or(false)
            })
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                meta.is_file().then(|| (entry.path(), meta))
            })
            .collect()
    }
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("cache_dir", &self.config.cache_dir)
            .field("expiration", &self.config.expiration)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

fn read_entry(path: &Path) -> Option<Vec<u8>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("Failed to read cache {}: {}", path.display(), err);
            return None;
        }
    };
    let entry: CacheEntry = match serde_json::from_slice(&bytes) {
        Ok(entry) => entry,
        Err(err) => {
            warn!("Malformed cache entry {}: {}", path.display(), err);
            return None;
        }
    };
    match BASE64.decode(entry.payload.as_bytes()) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!("Undecodable payload in {}: {}", path.display(), err);
            None
        }
    }
}

fn write_entry(path: &Path, entry: &CacheEntry) -> Result<()> {
    let json = serde_json::to_vec_pretty(entry)
        .map_err(|e| Error::io(path, std::io::Error::new(ErrorKind::InvalidData, e)))?;
    let mut writer = AtomicFileWriter::new(path)?;
    writer.write(&json)?;
    writer.commit()
}

#[cfg(unix)]
fn restrict_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|e| Error::io(dir, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Cache usage numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Valid hits served by this handle.
    pub hits: u64,
    /// Misses (absent, expired or unreadable) seen by this handle.
    pub misses: u64,
    /// Entry files currently on disk.
    pub entries: usize,
    /// Total size of entry files.
    pub size_bytes: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0.0 with no lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Response Cache Stats:\n\
             ├─ Lookups:\n\
             │  ├─ Hits: {}\n\
             │  ├─ Misses: {}\n\
             │  └─ Hit Rate: {:.2}%\n\
             └─ Storage:\n\
                ├─ Entries: {}\n\
                └─ Size: {:.2} KiB",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.entries,
            self.size_bytes as f64 / 1024.0
        )
    }
}
