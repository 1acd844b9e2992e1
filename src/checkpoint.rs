//! Resume state: the cursor of the last fully processed batch, plus the
//! per-target instance lock that keeps two runs from writing it at once.

use std::fmt;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Offset of the last item of the last fully processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(i64);

impl Cursor {
    pub fn new(offset_id: i64) -> Self {
        Self(offset_id)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-disk shape of the resume file.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    last_id: i64,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove checkpoint {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Another chatpd-rs instance is running for this target (lock: {0})")]
    Locked(PathBuf),

    #[error("Failed to create lock file {path}: {source}")]
    LockFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Single-writer store for the [`Cursor`].
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted cursor. A missing or unreadable record starts from
    /// the beginning of history.
    pub async fn load(&self) -> Cursor {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No checkpoint at {}, starting fresh", self.path.display());
                return Cursor::default();
            }
            Err(e) => {
                tracing::warn!(
                    "Could not read checkpoint {}: {}, starting fresh",
                    self.path.display(),
                    e
                );
                return Cursor::default();
            }
        };
        match serde_json::from_str::<CheckpointRecord>(&content) {
            Ok(record) => Cursor(record.last_id),
            Err(e) => {
                tracing::warn!(
                    "Malformed checkpoint {}: {}, starting fresh",
                    self.path.display(),
                    e
                );
                Cursor::default()
            }
        }
    }

    /// Persist `cursor`, replacing the previous record atomically.
    pub async fn save(&self, cursor: Cursor) -> Result<(), CheckpointError> {
        let write_err = |source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let body = serde_json::to_string(&CheckpointRecord { last_id: cursor.0 })
            .map_err(|e| write_err(e.into()))?;

        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, body).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(write_err)?;
        tracing::debug!(cursor = cursor.0, "Checkpoint saved");
        Ok(())
    }

    /// Remove the record. Returns whether one existed.
    pub async fn clear(&self) -> Result<bool, CheckpointError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CheckpointError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Exclusive advisory lock held for the lifetime of a run.
#[derive(Debug)]
pub struct InstanceLock {
    _file: std::fs::File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CheckpointError::LockFile {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let file = std::fs::File::create(path).map_err(|source| CheckpointError::LockFile {
            path: path.to_path_buf(),
            source,
        })?;
        file.try_lock_exclusive()
            .map_err(|_| CheckpointError::Locked(path.to_path_buf()))?;
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
