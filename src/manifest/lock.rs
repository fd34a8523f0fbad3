// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Exclusive advisory locking for the manifest document.
//!
//! Cross-process mutual exclusion is needed in exactly one place: the
//! manifest's read-migrate-merge-write sequence. The lock is a sidecar file
//! next to the manifest (`manifest.json.lock`) created with `O_EXCL` and
//! additionally locked through [`fs2`], held by a guard that releases and
//! unlinks on drop, including every error path.
//!
//! A holder that crashes before unlinking would otherwise wedge all future
//! writers, so a lock file whose age exceeds the staleness threshold is
//! treated as abandoned and reclaimed. Contention is handled with bounded
//! retries and linear backoff; exhausting them is a hard error, since
//! proceeding without exclusive access risks manifest corruption.

use fs2::FileExt;
use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tracing::{debug, warn};

/// Suffix appended to the locked target's file name.
pub const LOCK_SUFFIX: &str = ".lock";

/// Lock acquisition tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    /// Attempts before giving up.
    pub retries: u32,

    /// Base delay between attempts; grows linearly per attempt.
    pub retry_delay: Duration,

    /// Age past which an existing lock file counts as abandoned.
    pub stale_threshold: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            retries: 50,
            retry_delay: Duration::from_millis(100),
            stale_threshold: Duration::from_secs(60),
        }
    }
}

/// Scoped holder of the manifest lock.
///
/// Dropping the guard releases the advisory lock and unlinks the lock
/// file. Keep it alive for the whole read-modify-write sequence.
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Closing the file releases the fs2 lock.
        if let Some(file) = self.file.take() {
            drop(file);
        }

        // The file may already be gone if another process reclaimed us as
        // stale; that is fine.
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Acquire the exclusive manifest lock with default options.
///
/// # Errors
///
/// - Return [`LockAcquisitionError::Contended`] when retries run out.
/// - Return [`LockAcquisitionError::Io`] if the lock file cannot be
///   created for reasons other than contention.
pub async fn acquire(target: &Path) -> Result<LockGuard> {
    acquire_with(target, LockOptions::default()).await
}

/// Acquire the exclusive manifest lock with explicit options.
///
/// # Errors
///
/// - Return [`LockAcquisitionError::Contended`] when retries run out.
/// - Return [`LockAcquisitionError::Io`] if the lock file cannot be
///   created for reasons other than contention.
pub async fn acquire_with(target: &Path, options: LockOptions) -> Result<LockGuard> {
    let lock_path = lock_path_for(target);

    for attempt in 0..options.retries {
        match try_acquire(&lock_path)? {
            Some(guard) => {
                debug!("acquired manifest lock at {}", lock_path.display());
                return Ok(guard);
            }
            None => {
                if reclaim_if_stale(&lock_path, options.stale_threshold) {
                    continue;
                }

                let backoff = options.retry_delay * (attempt + 1).min(10);
                tokio::time::sleep(backoff).await;
            }
        }
    }

    Err(LockAcquisitionError::Contended {
        path: lock_path,
        attempts: options.retries,
    })
}

/// Lock file path for a locked target.
#[must_use]
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// One acquisition attempt. `Ok(None)` means the lock is currently held.
fn try_acquire(lock_path: &Path) -> Result<Option<LockGuard>> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(mut file) => {
            // PID lets humans inspect who held a leftover lock.
            let _ = writeln!(file, "{}", std::process::id());

            if file.try_lock_exclusive().is_err() {
                // We created the file but could not lock it; leave nothing
                // behind to wedge other waiters.
                drop(file);
                let _ = std::fs::remove_file(lock_path);
                return Ok(None);
            }

            Ok(Some(LockGuard {
                file: Some(file),
                path: lock_path.to_path_buf(),
            }))
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(err) => Err(LockAcquisitionError::Io {
            source: err,
            path: lock_path.to_path_buf(),
        }),
    }
}

/// Reclaim a lock file whose holder appears to have crashed.
///
/// Returns true if the stale file was removed and the caller should retry
/// immediately.
fn reclaim_if_stale(lock_path: &Path, threshold: Duration) -> bool {
    let age = std::fs::metadata(lock_path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok());

    match age {
        Some(age) if age > threshold => {
            warn!(
                "manifest lock at {} is {}s old, reclaiming it as abandoned",
                lock_path.display(),
                age.as_secs()
            );
            // NotFound here means another waiter beat us to the reclaim.
            if let Err(err) = std::fs::remove_file(lock_path) {
                if err.kind() != ErrorKind::NotFound {
                    warn!("failed to reclaim stale lock: {err}");
                    return false;
                }
            }
            true
        }
        // Racing unlink between existence check and stat: retry right away.
        None => !lock_path.exists(),
        Some(_) => false,
    }
}

/// Manifest lock error types.
#[derive(Debug, thiserror::Error)]
pub enum LockAcquisitionError {
    /// Retries exhausted while another holder kept the lock.
    #[error("manifest lock at {} still held after {attempts} attempt(s)", path.display())]
    Contended { path: PathBuf, attempts: u32 },

    /// Lock file cannot be created.
    #[error("failed to create manifest lock at {}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LockAcquisitionError> = std::result::Result<T, E>;
