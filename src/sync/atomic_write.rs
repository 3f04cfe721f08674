//! # Atomic File Replacement
//!
//! Content is written to a uniquely named temporary file next to the target
//! and renamed over it on commit. Readers observe either the previous
//! complete file or the new complete file, never a torn mix.
//!
//! ```text
//!     dir/
//!     ├── state.ratelimit                 <- readers see this until commit
//!     └── .state.ratelimit.XXXXXX.tmp     <- writes land here
//!
//!     commit: flush → fsync → rename(tmp, target)
//!     abort / drop: unlink(tmp)
//! ```

use crate::error::{Error, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

/// Writer whose output replaces `target` only when committed.
///
/// Dropping the writer without calling [`commit`](Self::commit) deletes the
/// temporary file and leaves the target untouched.
///
/// # Example
///
/// ```rust
/// use durable_rater::AtomicFileWriter;
///
/// let dir = tempfile::tempdir().unwrap();
/// let target = dir.path().join("config.json");
///
/// let mut writer = AtomicFileWriter::new(&target).unwrap();
/// writer.write_str("{\"enabled\": true}").unwrap();
/// writer.commit().unwrap();
///
/// assert_eq!(std::fs::read_to_string(&target).unwrap(), "{\"enabled\": true}");
/// ```
#[derive(Debug)]
pub struct AtomicFileWriter {
    target: PathBuf,
    temp: NamedTempFile,
}

impl AtomicFileWriter {
    /// Creates the target's parent directories and opens a temporary sibling.
    pub fn new(target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

        let prefix = match target.file_name() {
            Some(name) => format!(".{}.", name.to_string_lossy()),
            None => ".atomic.".to_string(),
        };
        let temp = Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| Error::io(&dir, e))?;

        Ok(Self { target, temp })
    }

    /// File that will be replaced on commit.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Location of the pending temporary file.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Appends `bytes` to the pending content.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.temp
            .write_all(bytes)
            .map_err(|e| Error::io(self.temp.path(), e))
    }

    /// Appends UTF-8 `text` to the pending content.
    pub fn write_str(&mut self, text: &str) -> Result<()> {
        self.write(text.as_bytes())
    }

    /// Flushes, syncs and renames the temporary file onto the target.
    ///
    /// If the first rename fails (some platforms refuse to replace an existing
    /// file), the target is removed and the rename retried once. On final
    /// failure the temporary file is removed and the error returned.
    pub fn commit(self) -> Result<()> {
        let Self { target, mut temp } = self;

        temp.flush().map_err(|e| Error::io(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Error::io(temp.path(), e))?;

        match temp.persist(&target) {
            Ok(_) => {}
            Err(first) => {
                debug!(
                    "Rename onto {} failed ({}), retrying after removal",
                    target.display(),
                    first.error
                );
                if let Err(err) = fs::remove_file(&target) {
                    if err.kind() != io::ErrorKind::NotFound {
                        warn!("Could not remove {} before retry: {}", target.display(), err);
                    }
                }
                // The returned NamedTempFile unlinks itself when dropped on failure.
                first
                    .file
                    .persist(&target)
                    .map_err(|second| Error::io(&target, second.error))?;
            }
        }

        sync_parent_dir(&target);
        Ok(())
    }

    /// Discards the pending content. Equivalent to dropping the writer.
    pub fn abort(self) {
        drop(self);
    }
}

impl Write for AtomicFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

/// Makes the rename itself durable. Best effort: not every platform allows
/// opening a directory.
#[cfg(unix)]
fn sync_parent_dir(target: &Path) {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_target: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_commit_creates_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("out.bin");

        let mut writer = AtomicFileWriter::new(&target).unwrap();
        writer.write(&[1, 2, 3]).unwrap();
        writer.write(&[4]).unwrap();
        writer.commit().unwrap();

        assert_eq!(fs::read(&target).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(entries(target.parent().unwrap()), vec!["out.bin"]);
    }

    #[test]
    fn test_commit_replaces_existing() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.txt");
        fs::write(&target, "old contents that are longer").unwrap();

        let mut writer = AtomicFileWriter::new(&target).unwrap();
        writer.write_str("new").unwrap();
        writer.commit().unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn test_abort_leaves_target_intact() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.txt");
        fs::write(&target, "original").unwrap();

        let mut writer = AtomicFileWriter::new(&target).unwrap();
        writer.write_str("partial").unwrap();
        let temp = writer.temp_path().to_path_buf();
        assert!(temp.exists());
        writer.abort();

        assert_eq!(fs::read_to_string(&target).unwrap(), "original");
        assert!(!temp.exists());
        assert_eq!(entries(dir.path()), vec!["out.txt"]);
    }

    #[test]
    fn test_drop_discards_temp_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("never.txt");

        {
            let mut writer = AtomicFileWriter::new(&target).unwrap();
            writer.write_str("discarded").unwrap();
        }

        assert!(!target.exists());
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn test_temp_file_is_hidden_sibling() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("state.ratelimit");

        let writer = AtomicFileWriter::new(&target).unwrap();
        let temp = writer.temp_path();
        assert_eq!(temp.parent(), target.parent());

        let name = temp.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with(".state.ratelimit."));
        assert!(name.ends_with(".tmp"));
        assert_eq!(writer.target(), target.as_path());
    }

    #[test]
    fn test_io_write_impl() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.txt");

        let mut writer = AtomicFileWriter::new(&target).unwrap();
        write!(writer, "{}-{}", "a", 1).unwrap();
        Write::flush(&mut writer).unwrap();
        writer.commit().unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "a-1");
    }
}
