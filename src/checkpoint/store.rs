//! Checkpoint persistence
//!
//! Implements interval-throttled atomic writes and validated loads.

use super::snapshot::{Checkpoint, Fingerprint, SCHEMA_VERSION};
use super::{write_atomic, CheckpointError, CHECKPOINT_SUFFIX, MAX_CHECKPOINT_FILE_SIZE, SUMMARY_SUFFIX};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reads and writes one checkpoint file plus its summary.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    summary_path: PathBuf,
    flush_interval: Duration,
    last_write: Mutex<Option<Instant>>,
}

impl CheckpointStore {
    /// Store at an explicit path. The summary sits next to it.
    pub fn new(path: impl Into<PathBuf>, flush_interval: Duration) -> Self {
        let path = path.into();
        let summary_path = summary_path_for(&path);
        Self {
            path,
            summary_path,
            flush_interval,
            last_write: Mutex::new(None),
        }
    }

    /// Store for a fingerprint under `dir`:
    /// `{dir}/{source_id}_{period}.checkpoint.json`
    pub fn for_fingerprint(dir: &Path, fingerprint: &Fingerprint, flush_interval: Duration) -> Self {
        let path = dir.join(format!("{}{}", fingerprint.file_stem(), CHECKPOINT_SUFFIX));
        Self::new(path, flush_interval)
    }

    /// Checkpoint file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Summary file path
    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    /// Load the checkpoint for `expected`, or `None` to start fresh.
    ///
    /// Never merges a checkpoint that belongs to another fingerprint.
    pub fn load(&self, expected: &Fingerprint) -> Option<Checkpoint> {
        match self.try_load(expected) {
            Ok(checkpoint) => {
                info!(
                    fingerprint = %expected,
                    items_checked = checkpoint.items_checked().len(),
                    "Resuming from checkpoint"
                );
                Some(checkpoint)
            }
            Err(CheckpointError::NotFound(_)) => {
                debug!(fingerprint = %expected, "No checkpoint, starting fresh");
                None
            }
            Err(e) => {
                warn!(
                    fingerprint = %expected,
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring checkpoint, starting fresh"
                );
                None
            }
        }
    }

    /// Load and validate, exposing the reason on failure.
    pub fn try_load(&self, expected: &Fingerprint) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = read_checkpoint(&self.path)?;
        if checkpoint.fingerprint() != expected {
            return Err(CheckpointError::FingerprintMismatch {
                expected: expected.to_string(),
                found: checkpoint.fingerprint().to_string(),
            });
        }
        Ok(checkpoint)
    }

    /// Persist the checkpoint if forced or the flush interval has elapsed.
    ///
    /// # Returns
    /// `true` when the file was written. Failures are logged, never raised.
    pub fn save(&self, checkpoint: &Checkpoint, force: bool) -> bool {
        let mut last_write = self.last_write.lock().unwrap_or_else(|e| e.into_inner());
        let due = match *last_write {
            None => true,
            Some(at) => at.elapsed() >= self.flush_interval,
        };
        if !force && !due {
            return false;
        }

        match self.write(checkpoint) {
            Ok(()) => {
                *last_write = Some(Instant::now());
                crate::metrics::record_checkpoint_write(true);
                debug!(
                    path = %self.path.display(),
                    items_checked = checkpoint.items_checked().len(),
                    force,
                    "Checkpoint saved"
                );
                true
            }
            Err(e) => {
                crate::metrics::record_checkpoint_write(false);
                warn!(path = %self.path.display(), error = %e, "Failed to save checkpoint");
                false
            }
        }
    }

    fn write(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        write_atomic(&self.path, &json)
            .map_err(|e| CheckpointError::Io(format!("{}: {e}", self.path.display())))?;

        let summary = serde_json::to_vec_pretty(&checkpoint.summary())
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        write_atomic(&self.summary_path, &summary)
            .map_err(|e| CheckpointError::Io(format!("{}: {e}", self.summary_path.display())))?;
        Ok(())
    }
}

/// Summary path for a checkpoint path
fn summary_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(CHECKPOINT_SUFFIX).unwrap_or(&name);
    path.with_file_name(format!("{stem}{SUMMARY_SUFFIX}"))
}

/// Read a checkpoint file and check its schema version.
pub fn read_checkpoint(path: &Path) -> Result<Checkpoint, CheckpointError> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(CheckpointError::Io(e.to_string())),
    };
    if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
        return Err(CheckpointError::TooLarge {
            size: metadata.len(),
            max: MAX_CHECKPOINT_FILE_SIZE,
        });
    }

    let contents = std::fs::read_to_string(path).map_err(|e| CheckpointError::Io(e.to_string()))?;
    let checkpoint: Checkpoint = serde_json::from_str(&contents)
        .map_err(|e| CheckpointError::Deserialization(e.to_string()))?;

    if checkpoint.schema_version() != SCHEMA_VERSION {
        return Err(CheckpointError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION.to_string(),
            found: checkpoint.schema_version().to_string(),
        });
    }
    if let Some(item) = checkpoint.unchecked_success() {
        return Err(CheckpointError::Inconsistent(format!(
            "{item} is marked succeeded but was never checked"
        )));
    }
    Ok(checkpoint)
}

/// Read every `*.checkpoint.json` under `dir`, sorted by path.
pub fn scan_dir(dir: &Path) -> Result<Vec<(PathBuf, Result<Checkpoint, CheckpointError>)>, CheckpointError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CheckpointError::Io(format!("{}: {e}", dir.display())))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().ends_with(CHECKPOINT_SUFFIX))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    Ok(paths
        .into_iter()
        .map(|path| {
            let result = read_checkpoint(&path);
            (path, result)
        })
        .collect())
}
