//! Advisory lock files.
//!
//! The lock is an exclusive `flock` on a small marker file. It is advisory:
//! only cooperating processes that try the same lock are kept out. Lock
//! conflicts are per open file, so two handles in one process exclude each
//! other too.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Attempts before giving up when the lock file keeps being replaced.
const MAX_ACQUIRE_ATTEMPTS: usize = 8;

/// Whether the open `file` is still the file linked at `path`.
///
/// A holder releases by unlinking the marker while still locked, so a handle
/// opened just before that can end up locking an orphaned inode.
#[cfg(unix)]
fn is_linked_at(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(linked) => Ok(held.dev() == linked.dev() && held.ino() == linked.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

// Windows refuses to delete a file that is open, so a handle can't outlive
// its link.
#[cfg(not(unix))]
fn is_linked_at(_file: &File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // Windows reports sharing and lock violations as raw OS errors.
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// An exclusive advisory lock, held until released or dropped.
///
/// Dropping the lock unlocks it but leaves the marker file in place;
/// [`AdvisoryLock::release`] removes the file as well.
#[derive(Debug)]
pub struct AdvisoryLock {
    file: File,
    path: PathBuf,
}

impl AdvisoryLock {
    /// Tries to take the lock without waiting.
    ///
    /// Creates the marker file and its parent directory if needed. Returns
    /// `Ok(None)` when another holder has the lock.
    ///
    /// A lock taken on a marker that was unlinked in the meantime is dropped
    /// and the attempt repeated on the current file.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than lock contention.
    pub fn try_acquire(path: impl AsRef<Path>) -> io::Result<Option<Self>> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;

            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {}
                Err(e) if is_lock_contended(&e) => return Ok(None),
                Err(e) => return Err(e),
            }

            if is_linked_at(&file, path)? {
                return Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }));
            }
            // Stale inode; `file` unlocks on drop.
        }

        // The marker keeps changing under us, so someone else is cycling it.
        Ok(None)
    }

    /// Path of the marker file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the marker file and unlocks.
    ///
    /// The file is removed while the lock is still held.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be removed. The lock is
    /// released either way.
    pub fn release(self) -> io::Result<()> {
        let removed = match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        };
        FileExt::unlock(&self.file)?;
        removed
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
