//! Cross-process exclusion for draining one sample store.
//!
//! [`SampleStore::claim_consumer`](crate::store::SampleStore::claim_consumer)
//! only serializes cycles inside one process. Hosts that may run several
//! processes against the same database file take a [`StoreLock`] before
//! starting a sync engine.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{TrackerError, TrackerResult};

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLockMeta {
    pub pid: u32,
    pub started_at_ms: i64,
}

/// An exclusive lock file next to the store, removed on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// The lock file path for a store at `store_path`.
    pub fn path_for(store_path: &Path) -> PathBuf {
        let mut name = store_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Create the lock file for `store_path`.
    ///
    /// # Errors
    ///
    /// `StoreLocked` if the file already exists. A lock left behind by a
    /// crashed process has to be removed by hand; the error names its path
    /// and the pid that wrote it.
    pub fn acquire(store_path: &Path) -> TrackerResult<Self> {
        let path = Self::path_for(store_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    TrackerError::storage(format!("Failed to create store directory: {e}"))
                })?;
            }
        }

        let mut file = match open_new_lock_file(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = match read_metadata(&path) {
                    Some(meta) => format!("pid {}", meta.pid),
                    None => "an unknown process".to_string(),
                };
                return Err(TrackerError::StoreLocked {
                    message: format!(
                        "{} is held by {holder}; remove it if that process is gone",
                        path.display()
                    ),
                });
            }
            Err(e) => {
                return Err(TrackerError::storage(format!(
                    "Failed to create lock file {}: {e}",
                    path.display()
                )))
            }
        };

        let meta = StoreLockMeta {
            pid: std::process::id(),
            started_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        let lock = Self { path };
        serde_json::to_writer(&mut file, &meta)
            .map_err(io::Error::from)
            .and_then(|()| file.flush())
            .map_err(|e| TrackerError::storage(format!("Failed to write lock file: {e}")))?;

        debug!(path = %lock.path.display(), pid = meta.pid, "Store lock acquired");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

fn read_metadata(path: &Path) -> Option<StoreLockMeta> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn open_new_lock_file(path: &Path) -> io::Result<fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
    }
    #[cfg(not(unix))]
    {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
    }
}
