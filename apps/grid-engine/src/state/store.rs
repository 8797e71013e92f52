//! Atomic JSON snapshots of [`ExecutionState`], one file per pair.
//!
//! Writes go to a temporary file in the target directory which is then
//! renamed over the snapshot, so a crash mid-write leaves the previous
//! snapshot intact.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use super::ExecutionState;

// ============================================================================
// Errors
// ============================================================================

/// Errors from snapshot persistence.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem error.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot belongs to another pair.
    #[error("Snapshot at {path} is for pair {found}, expected {expected}")]
    PairMismatch {
        /// Path read.
        path: String,
        /// Pair requested.
        expected: String,
        /// Pair stored.
        found: String,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Write `value` as pretty JSON to `path` via temp file and rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n").map_err(io_error(path))?;
    tmp.as_file().sync_all().map_err(io_error(path))?;
    tmp.persist(path).map_err(|e| PersistenceError::Io {
        path: path.display().to_string(),
        source: e.error,
    })?;
    Ok(())
}

// ============================================================================
// State Store
// ============================================================================

/// Directory of per-pair state snapshots.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Store rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Snapshot path for a pair, e.g. `ETH_USDT.json`.
    #[must_use]
    pub fn path_for(&self, pair: &str) -> PathBuf {
        let name: String = pair
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }

    /// Load the snapshot for a pair, or `None` if there is none yet.
    pub fn load(&self, pair: &str) -> Result<Option<ExecutionState>, PersistenceError> {
        let path = self.path_for(pair);
        if !path.exists() {
            debug!(pair, path = %path.display(), "no state snapshot");
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(io_error(&path))?;
        let state: ExecutionState = serde_json::from_str(&text)?;
        if state.pair != pair {
            return Err(PersistenceError::PairMismatch {
                path: path.display().to_string(),
                expected: pair.to_string(),
                found: state.pair,
            });
        }
        info!(
            pair,
            orders = state.orders.len(),
            last_seq = ?state.ledger.last_seq(),
            "restored state snapshot"
        );
        Ok(Some(state))
    }

    /// Atomically replace the snapshot for `state.pair`.
    pub fn save(&self, state: &ExecutionState) -> Result<(), PersistenceError> {
        let path = self.path_for(&state.pair);
        write_json_atomic(&path, state)?;
        debug!(pair = %state.pair, path = %path.display(), "state committed");
        Ok(())
    }
}
