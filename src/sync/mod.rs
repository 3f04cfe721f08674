//! Filesystem synchronization primitives shared by the rate limiter and the
//! response cache.
//!
//! - [`FileLock`]: shared/exclusive advisory lock with a bounded wait
//! - [`ScopedLockFile`]: marker-file mutex for filesystems without locks
//! - [`AtomicFileWriter`]: all-or-nothing replacement of a file's contents

mod atomic_write;
mod lock;

pub use atomic_write::AtomicFileWriter;
pub use lock::{FileLock, LockMode, ScopedLockFile, DEFAULT_LOCK_TIMEOUT, LOCK_RETRY_INTERVAL};

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// `path` with `suffix` appended to its final component
/// (`a/b.ratelimit` + `.lock` = `a/b.ratelimit.lock`).
pub(crate) fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_with_suffix() {
        assert_eq!(
            sibling_with_suffix(Path::new("/tmp/state/api.ratelimit"), ".lock"),
            PathBuf::from("/tmp/state/api.ratelimit.lock")
        );
        assert_eq!(
            sibling_with_suffix(Path::new("app"), ".lock"),
            PathBuf::from("app.lock")
        );
    }
}
