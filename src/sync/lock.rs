//! # Advisory File Locks
//!
//! RAII guards over OS-level advisory locks (`flock` on Unix, `LockFileEx`
//! on Windows, both via [`fs2`]). Locks are taken non-blocking and polled
//! on a short fixed interval so every wait is bounded by an explicit
//! timeout:
//!
//! ```text
//!     acquire(path, mode, timeout)
//!          │
//!          ▼
//!     open/create file ──► try lock (non-blocking) ──Ok──► FileLock
//!                               │
//!                          WouldBlock
//!                               │
//!                     elapsed >= timeout? ──yes──► LockError::Timeout
//!                               │ no
//!                          sleep 10ms, retry
//! ```
//!
//! Locks only constrain cooperating processes that also take them.

use crate::error::LockError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::sibling_with_suffix;

/// Interval between non-blocking lock attempts while waiting.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Default bound on how long a lock acquisition may wait.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Lock mode requested from the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of shared holders may coexist.
    Shared,
    /// Excludes every other holder, shared or exclusive.
    Exclusive,
}

/// Scope-bound advisory lock on a file.
///
/// The lock is released and the descriptor closed when the guard is dropped
/// or [`unlock`](Self::unlock) is called, whichever comes first.
///
/// # Example
///
/// ```rust
/// use durable_rater::{FileLock, LockMode};
/// use std::time::Duration;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("data.lock");
///
/// {
///     let lock = FileLock::acquire(&path, LockMode::Exclusive, Duration::from_secs(1)).unwrap();
///     assert!(lock.is_locked());
///     // exclusive access to whatever `path` protects
/// } // released here
/// ```
#[derive(Debug)]
pub struct FileLock {
    file: Option<File>,
    path: PathBuf,
    mode: LockMode,
}

impl FileLock {
    /// Opens (creating if needed) `path` and locks it in `mode`, waiting at
    /// most `timeout`.
    ///
    /// Parent directories are created. A zero timeout makes exactly one
    /// attempt.
    ///
    /// # Errors
    ///
    /// [`LockError::Timeout`] when the lock stayed contended for the whole
    /// bound, [`LockError::Io`] for any other failure.
    pub fn acquire(
        path: impl AsRef<Path>,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let file = open_lock_file(&path)?;

        let start = Instant::now();
        loop {
            match lock_nonblocking(&file, mode) {
                Ok(()) => {
                    debug!("Acquired {:?} lock on {}", mode, path.display());
                    return Ok(Self {
                        file: Some(file),
                        path,
                        mode,
                    });
                }
                Err(err) if is_contended(&err) => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        debug!("Timed out after {:?} waiting for {}", elapsed, path.display());
                        return Err(LockError::Timeout { path, timeout });
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL.min(timeout - elapsed));
                }
                Err(source) => return Err(LockError::Io { path, source }),
            }
        }
    }

    /// Shorthand for an exclusive [`acquire`](Self::acquire).
    pub fn exclusive(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, LockError> {
        Self::acquire(path, LockMode::Exclusive, timeout)
    }

    /// Shorthand for a shared [`acquire`](Self::acquire).
    pub fn shared(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, LockError> {
        Self::acquire(path, LockMode::Shared, timeout)
    }

    /// Returns `true` while the lock is held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.file.is_some()
    }

    /// Path of the locked file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode currently held. Meaningless once unlocked.
    #[inline]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Releases the lock and closes the descriptor. Safe to call repeatedly.
    pub fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(err) = FileExt::unlock(&file) {
                // Closing the descriptor below releases it regardless.
                debug!("Explicit unlock of {} failed: {}", self.path.display(), err);
            }
        }
    }

    /// Downgrades a held exclusive lock to shared without blocking.
    ///
    /// Returns `false` when no exclusive lock is held or the platform cannot
    /// convert locks in place; the held mode is unchanged in that case.
    pub fn try_lock_shared(&mut self) -> bool {
        if self.mode != LockMode::Exclusive {
            return false;
        }
        let Some(file) = self.file.as_ref() else {
            return false;
        };
        if !cfg!(unix) {
            return false;
        }
        match FileExt::try_lock_shared(file) {
            Ok(()) => {
                self.mode = LockMode::Shared;
                true
            }
            Err(err) => {
                warn!("Lock downgrade on {} failed: {}", self.path.display(), err);
                false
            }
        }
    }

    /// Upgrades a held shared lock to exclusive without blocking.
    ///
    /// Returns `false` when no shared lock is held, another holder exists,
    /// or the platform cannot convert locks in place. `flock` drops the old
    /// lock before requesting the new one, so after a contended upgrade the
    /// shared lock is re-requested; if even that fails the guard reports
    /// itself unlocked.
    pub fn try_upgrade(&mut self) -> bool {
        if self.mode != LockMode::Shared {
            return false;
        }
        let Some(file) = self.file.as_ref() else {
            return false;
        };
        if !cfg!(unix) {
            return false;
        }
        match FileExt::try_lock_exclusive(file) {
            Ok(()) => {
                self.mode = LockMode::Exclusive;
                true
            }
            Err(_) => {
                if FileExt::try_lock_shared(file).is_err() {
                    warn!(
                        "Lost shared lock on {} after failed upgrade",
                        self.path.display()
                    );
                    self.file = None;
                }
                false
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// Mutual exclusion by existence of a `<path>.lock` marker file.
///
/// Unlike [`FileLock`] this needs no OS lock support: whoever creates the
/// marker (with `O_EXCL` semantics) owns it until it is removed. The marker
/// holds the owner's PID for debugging. A crashed owner leaves the marker
/// behind, so callers must pick timeouts accordingly.
#[derive(Debug)]
pub struct ScopedLockFile {
    lock_path: PathBuf,
    locked: bool,
}

impl ScopedLockFile {
    /// Creates `<path>.lock`, waiting at most `timeout` for a current owner
    /// to remove it.
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, LockError> {
        let lock_path = sibling_with_suffix(path.as_ref(), ".lock");
        ensure_parent(&lock_path)?;

        let start = Instant::now();
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    if let Err(err) = writeln!(file, "{}", std::process::id()) {
                        debug!("Could not record owner in {}: {}", lock_path.display(), err);
                    }
                    return Ok(Self {
                        lock_path,
                        locked: true,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        return Err(LockError::Timeout {
                            path: lock_path,
                            timeout,
                        });
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL.min(timeout - elapsed));
                }
                Err(source) => {
                    return Err(LockError::Io {
                        path: lock_path,
                        source,
                    })
                }
            }
        }
    }

    /// Path of the marker file.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Returns `true` until the marker has been removed.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Removes the marker. Safe to call repeatedly.
    pub fn unlock(&mut self) {
        if !self.locked {
            return;
        }
        self.locked = false;
        if let Err(err) = fs::remove_file(&self.lock_path) {
            if err.kind() != ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.lock_path.display(), err);
            }
        }
    }
}

impl Drop for ScopedLockFile {
    fn drop(&mut self) {
        self.unlock();
    }
}

fn ensure_parent(path: &Path) -> Result<(), LockError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

fn open_lock_file(path: &Path) -> Result<File, LockError> {
    ensure_parent(path)?;
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn lock_nonblocking(file: &File, mode: LockMode) -> io::Result<()> {
    match mode {
        LockMode::Shared => FileExt::try_lock_shared(file),
        LockMode::Exclusive => FileExt::try_lock_exclusive(file),
    }
}

/// Contention shows up as `WouldBlock` on Unix but as a raw
/// `ERROR_LOCK_VIOLATION` on Windows.
fn is_contended(err: &io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || (err.raw_os_error().is_some()
            && err.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_exclusive_excludes_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        let first = FileLock::exclusive(&path, SHORT).unwrap();
        assert!(first.is_locked());

        let err = FileLock::exclusive(&path, SHORT).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        let a = FileLock::shared(&path, SHORT).unwrap();
        let b = FileLock::shared(&path, SHORT).unwrap();
        assert!(a.is_locked() && b.is_locked());

        // Readers keep writers out
        assert!(FileLock::exclusive(&path, SHORT).unwrap_err().is_timeout());
    }

    #[test]
    fn test_exclusive_excludes_shared() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        let _writer = FileLock::exclusive(&path, SHORT).unwrap();
        assert!(FileLock::shared(&path, SHORT).unwrap_err().is_timeout());
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        {
            let _lock = FileLock::exclusive(&path, SHORT).unwrap();
        }
        assert!(FileLock::exclusive(&path, SHORT).is_ok());
    }

    #[test]
    fn test_unlock_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        let mut lock = FileLock::exclusive(&path, SHORT).unwrap();
        lock.unlock();
        lock.unlock();
        assert!(!lock.is_locked());
        assert!(FileLock::exclusive(&path, SHORT).is_ok());
    }

    #[test]
    fn test_timeout_waits_roughly_the_bound() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        let _held = FileLock::exclusive(&path, SHORT).unwrap();
        let start = Instant::now();
        let err = FileLock::exclusive(&path, Duration::from_millis(80)).unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn test_zero_timeout_single_attempt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        assert!(FileLock::exclusive(&path, Duration::ZERO).is_ok());
        let _held = FileLock::exclusive(&path, SHORT).unwrap();
        assert!(FileLock::exclusive(&path, Duration::ZERO)
            .unwrap_err()
            .is_timeout());
    }

    #[test]
    fn test_waiter_acquires_after_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        let held = FileLock::exclusive(&path, SHORT).unwrap();
        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            FileLock::exclusive(&waiter_path, Duration::from_secs(2)).map(|l| l.is_locked())
        });
        thread::sleep(Duration::from_millis(40));
        drop(held);
        assert!(waiter.join().unwrap().unwrap());
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("a.lock");

        let lock = FileLock::exclusive(&path, SHORT).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path.as_path());
        assert_eq!(lock.mode(), LockMode::Exclusive);
    }

    #[test]
    fn test_mode_conversion_guards() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        let mut shared = FileLock::shared(&path, SHORT).unwrap();
        assert!(!shared.try_lock_shared(), "not exclusive, cannot downgrade");
        shared.unlock();
        assert!(!shared.try_upgrade(), "not held, cannot upgrade");
    }

    #[cfg(unix)]
    #[test]
    fn test_downgrade_admits_readers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        let mut lock = FileLock::exclusive(&path, SHORT).unwrap();
        assert!(lock.try_lock_shared());
        assert_eq!(lock.mode(), LockMode::Shared);
        assert!(FileLock::shared(&path, SHORT).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_upgrade_without_other_holders() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        let mut lock = FileLock::shared(&path, SHORT).unwrap();
        assert!(lock.try_upgrade());
        assert_eq!(lock.mode(), LockMode::Exclusive);
        assert!(FileLock::shared(&path, SHORT).unwrap_err().is_timeout());
    }

    #[cfg(unix)]
    #[test]
    fn test_upgrade_contended_reports_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        let _other_reader = FileLock::shared(&path, SHORT).unwrap();
        let mut lock = FileLock::shared(&path, SHORT).unwrap();
        assert!(!lock.try_upgrade());
        assert_eq!(lock.mode(), LockMode::Shared);
        // Whatever it reports must be true: a held shared lock still blocks writers
        if lock.is_locked() {
            assert!(FileLock::exclusive(&path, SHORT).unwrap_err().is_timeout());
        }
    }

    #[cfg(not(unix))]
    #[test]
    fn test_conversion_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.lock");

        let mut lock = FileLock::exclusive(&path, SHORT).unwrap();
        assert!(!lock.try_lock_shared());
        assert_eq!(lock.mode(), LockMode::Exclusive);
    }

    #[test]
    fn test_scoped_lock_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("app");

        let mut first = ScopedLockFile::acquire(&target, SHORT).unwrap();
        assert!(first.lock_path().exists());
        assert!(first.lock_path().to_string_lossy().ends_with("app.lock"));

        let err = ScopedLockFile::acquire(&target, SHORT).unwrap_err();
        assert!(err.is_timeout());

        first.unlock();
        first.unlock();
        assert!(!first.is_locked());
        assert!(!dir.path().join("app.lock").exists());

        let second = ScopedLockFile::acquire(&target, SHORT).unwrap();
        let owner = fs::read_to_string(second.lock_path()).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
        drop(second);
        assert!(!dir.path().join("app.lock").exists());
    }
}
