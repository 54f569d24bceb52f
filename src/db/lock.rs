// src/db/lock.rs

//! Lock-directory mutual exclusion for DB mutations
//!
//! `mkdir` is atomic on every filesystem porg targets, so a lock directory
//! next to the DB file gives portable advisory locking. Acquisition polls
//! with a bounded retry budget; release happens on Drop so every exit path
//! of a mutation gives the lock back.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Polling interval between acquisition attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Default attempt budget (~5 seconds)
const DEFAULT_RETRIES: u32 = 50;

/// RAII guard over a lock directory
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    /// Acquire the lock, retrying up to the default budget
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        Self::acquire_with_retries(path, DEFAULT_RETRIES)
    }

    /// Acquire the lock with an explicit retry budget
    pub fn acquire_with_retries(path: impl Into<PathBuf>, retries: u32) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        for attempt in 0..=retries {
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    debug!("acquired lock {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt == retries {
                        break;
                    }
                    std::thread::sleep(RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::DbLocked(path))
    }

    /// Whether some process currently holds the lock
    pub fn is_held(path: &Path) -> bool {
        path.is_dir()
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir(&self.path) {
            warn!("failed to release lock {}: {}", self.path.display(), e);
        } else {
            debug!("released lock {}", self.path.display());
        }
    }
}
