//! # Error Types
//!
//! Every failure this crate can surface is described here. The two
//! subsystems deliberately handle them differently:
//!
//! ```text
//!     Failure              Rate limiter        Response cache
//!     ─────────────────    ────────────────    ─────────────────────
//!     lock timeout         deny (false)        n/a
//!     I/O failure          deny (false)        miss / skipped write
//!     corrupt state        deny (false)        miss
//!     invalid key          n/a                 Err(InvalidKey)
//!     path escape          n/a                 Err(Security)
//! ```
//!
//! The rate limiter collapses lock, I/O and corruption failures into a
//! denial at its public boundary, so those variants mostly appear in
//! `reset()` and in logs. The cache only returns validation and security
//! errors to callers.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to obtain an advisory lock on a file.
#[derive(Debug, Error)]
pub enum LockError {
    /// Contention was not resolved within the caller's bound.
    #[error("timed out after {timeout:?} waiting for lock on {}", path.display())]
    Timeout {
        /// The locked path.
        path: PathBuf,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// Opening the file or issuing the lock call failed.
    #[error("failed to lock {}: {source}", path.display())]
    Io {
        /// The path being locked.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

impl LockError {
    /// Returns `true` for the timeout variant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A lock could not be acquired within its timeout.
    #[error("lock timeout on {}", path.display())]
    LockTimeout {
        /// The lock file.
        path: PathBuf,
    },

    /// A filesystem operation failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A persisted record had the wrong size, version or contents.
    #[error("corrupt state in {}: {reason}", path.display())]
    CorruptState {
        /// The state file.
        path: PathBuf,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A cache key or namespace failed validation.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A resolved path escaped its root directory.
    #[error("security violation: {0}")]
    Security(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for validation and security failures, the errors that
    /// point at a bug in the caller rather than at the environment.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidKey(_) | Self::Security(_))
    }
}

impl From<LockError> for Error {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { path, .. } => Self::LockTimeout { path },
            LockError::Io { path, source } => Self::Io { path, source },
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
