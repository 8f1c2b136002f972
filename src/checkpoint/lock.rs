//! Exclusive ownership of a checkpoint file
//!
//! Advisory file locking using fd-lock. The lock file sits next to the
//! checkpoint (`*.checkpoint.lock`) and is held until the guard is dropped.
//!
//! The stale-lock sweep unlinks lock files, so a lock only counts once the
//! path still names the file that was locked. An owner that locked an
//! unlinked file reopens the path and tries again.

use super::CheckpointError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extension of lock files
pub const LOCK_EXTENSION: &str = "lock";

const OPEN_ATTEMPTS: usize = 3;

/// Held exclusive lock on one checkpoint.
///
/// Dropping the guard closes the lock file, which releases the lock.
pub struct CheckpointLock {
    _lock: RwLock<File>,
    path: PathBuf,
}

impl std::fmt::Debug for CheckpointLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointLock").field("path", &self.path).finish()
    }
}

impl CheckpointLock {
    /// Try to take the lock for `checkpoint_path` without blocking.
    ///
    /// Returns [`CheckpointError::Lock`] immediately if another owner holds it.
    pub fn try_acquire(checkpoint_path: &Path) -> Result<Self, CheckpointError> {
        Self::try_acquire_file(lock_path_for(checkpoint_path))
    }

    fn try_acquire_file(path: PathBuf) -> Result<Self, CheckpointError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(e.to_string()))?;
        }

        for _ in 0..OPEN_ATTEMPTS {
            let file = open_lock_file(&path)?;
            if let Some(lock) = Self::lock_opened(&path, file)? {
                debug!(path = %path.display(), "Checkpoint lock acquired");
                return Ok(lock);
            }
            debug!(path = %path.display(), "Lock file was swept while locking, reopening");
        }
        Err(CheckpointError::Lock(format!(
            "{} kept being replaced while locking",
            path.display()
        )))
    }

    /// Lock an already open handle. `None` when `path` no longer names it.
    fn lock_opened(path: &Path, file: File) -> Result<Option<Self>, CheckpointError> {
        let mut lock = RwLock::new(file);
        let guard = lock.try_write().map_err(|e| {
            CheckpointError::Lock(format!("{} is held by another owner: {e}", path.display()))
        })?;
        if !still_linked(path, &guard) {
            return Ok(None);
        }
        // Keep the OS lock for the lifetime of the file handle
        std::mem::forget(guard);
        Ok(Some(Self {
            _lock: lock,
            path: path.to_path_buf(),
        }))
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(path: &Path) -> Result<File, CheckpointError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| CheckpointError::Lock(format!("Failed to open lock file: {e}")))
}

#[cfg(unix)]
fn still_linked(path: &Path, file: &File) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (std::fs::metadata(path), file.metadata()) {
        (Ok(on_disk), Ok(held)) => on_disk.dev() == held.dev() && on_disk.ino() == held.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(path: &Path, _file: &File) -> bool {
    path.exists()
}

/// Lock path for a checkpoint path
pub fn lock_path_for(checkpoint_path: &Path) -> PathBuf {
    checkpoint_path.with_extension(LOCK_EXTENSION)
}

/// Remove lock files under `dir` that no live owner holds.
///
/// Each file is unlinked while the sweep holds its lock; owners that race
/// with the unlink notice the replaced path and relock.
///
/// # Returns
/// The removed paths
pub fn sweep_stale_locks(dir: &Path) -> Result<Vec<PathBuf>, CheckpointError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CheckpointError::Io(format!("{}: {e}", dir.display())))?;

    let mut removed = Vec::new();
    for path in entries.filter_map(|e| e.ok().map(|e| e.path())) {
        if path.extension().and_then(|e| e.to_str()) != Some(LOCK_EXTENSION) {
            continue;
        }
        // Held locks fail here and are left alone
        let Ok(lock) = CheckpointLock::try_acquire_file(path.clone()) else {
            continue;
        };
        if std::fs::remove_file(&path).is_ok() {
            removed.push(path);
        }
        drop(lock);
    }

    if !removed.is_empty() {
        info!(count = removed.len(), dir = %dir.display(), "Removed stale checkpoint locks");
    }
    Ok(removed)
}
