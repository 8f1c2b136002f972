//! Durable progress snapshots for download sub-tasks
//!
//! Provides persistent checkpoints with atomic writes, schema versioning
//! and per-fingerprint file locking.

pub mod lock;
pub mod snapshot;
pub mod store;

pub use lock::{sweep_stale_locks, CheckpointLock};
pub use snapshot::{path_component, Checkpoint, CheckpointSummary, Fingerprint, SCHEMA_VERSION};
pub use store::{read_checkpoint, scan_dir, CheckpointStore};

use std::io::Write;
use std::path::{Path, PathBuf};

/// Maximum accepted checkpoint file size (64 MB) to prevent memory exhaustion
pub const MAX_CHECKPOINT_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Suffix of checkpoint files
pub const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

/// Suffix of the human-readable summary written next to each checkpoint
pub const SUMMARY_SUFFIX: &str = ".summary.json";

/// Replace `path` with `bytes` atomically.
///
/// Writes to a temp file in the same directory, syncs it, then renames it
/// over the target so readers never observe a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent_dir)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)?;
    temp_file.write_all(bytes)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;

    // Fsync parent directory so the rename is durable
    if let Ok(dir) = std::fs::File::open(parent_dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Errors related to checkpoints
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// No checkpoint at the path
    #[error("no checkpoint at {0}")]
    NotFound(PathBuf),

    /// Written by an incompatible format version
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Belongs to another source/period
    #[error("fingerprint mismatch: expected {expected}, found {found}")]
    FingerprintMismatch {
        /// Fingerprint the caller asked for
        expected: String,
        /// Fingerprint stored in the file
        found: String,
    },

    /// File too large
    #[error("checkpoint file too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Parsed, but its item sets contradict each other
    #[error("inconsistent checkpoint: {0}")]
    Inconsistent(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Lock error
    #[error("lock error: {0}")]
    Lock(String),
}
