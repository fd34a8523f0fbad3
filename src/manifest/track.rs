// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! In-memory accumulation of tracked files before a manifest flush.
//!
//! Installing or syncing a kit means checksumming every file that was just
//! written and recording the result. The tracker accumulates those records
//! in an ordered map keyed by normalized path, and the manifest write
//! flushes them in one document update.
//!
//! Batch tracking is I/O bound, so checksums are computed concurrently up
//! to an explicit bound instead of unboundedly; the default of 20 in-flight
//! reads suits SSD-backed roots, and callers on network filesystems should
//! pass something lower. One unreadable file never aborts the batch: it is
//! logged, counted, excluded from the tracked set, and the rest continues.
//!
//! Progress reporting is driven by per-task completion indices consumed on
//! a single stream, so reported counts are monotonic and exact regardless
//! of the order in which concurrent checksums finish. The callback fires at
//! an adaptive interval that works out to roughly twenty updates per batch
//! no matter the batch size.
//!
//! There is no cancellation token threaded through a batch; once started it
//! runs to completion, and cancellation is process-level only. Known
//! limitation, not a guarantee.

use crate::{
    checksum::{self, Ownership},
    manifest::TrackedFile,
    path::{self, normalize_path_key},
};

use futures::{stream, StreamExt};
use std::{collections::BTreeMap, path::Path};
use tracing::{debug, warn};

/// Default bound on concurrent checksum computations.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Target number of progress callback invocations per batch.
const PROGRESS_STEPS: usize = 20;

/// Result summary of a batch tracking run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Files checksummed and tracked.
    pub success: usize,

    /// Files that failed validation or checksumming and were excluded.
    pub failed: usize,

    /// Files attempted.
    pub total: usize,
}

/// Ordered accumulator of tracked-file records.
#[derive(Debug, Default)]
pub struct FileTracker {
    files: BTreeMap<String, TrackedFile>,
}

impl FileTracker {
    /// Construct new empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track one file, computing its checksum synchronously.
    ///
    /// # Errors
    ///
    /// - Return [`TrackError::Path`] if the path fails validation.
    /// - Return [`TrackError::Checksum`] if the file cannot be read.
    pub fn track_file(
        &mut self,
        root: &Path,
        relative_path: &str,
        version: &str,
    ) -> Result<()> {
        let absolute = path::validate(root, relative_path)?;
        let sum = checksum::checksum_file_sync(&absolute)?;
        self.insert(new_record(relative_path, sum, version));
        Ok(())
    }

    /// Track a batch of files under a bounded concurrency limit.
    ///
    /// `progress`, when given, receives `(completed, total)` at an adaptive
    /// interval and always once at the end. Per-file failures are logged
    /// and counted in the report; the batch never aborts for one file.
    pub async fn track_files(
        &mut self,
        root: &Path,
        relative_paths: &[String],
        version: &str,
        concurrency: usize,
        progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) -> BatchReport {
        let total = relative_paths.len();
        if total == 0 {
            return BatchReport::default();
        }

        let interval = (total / PROGRESS_STEPS).max(1);
        let concurrency = concurrency.max(1);

        let mut results = stream::iter(relative_paths.iter().enumerate().map(
            |(index, relative)| {
                let root = root.to_path_buf();
                let relative = relative.clone();
                async move {
                    let outcome = match path::validate(&root, &relative) {
                        Ok(absolute) => checksum::checksum_file(&absolute)
                            .await
                            .map_err(|err| err.to_string()),
                        Err(err) => Err(err.to_string()),
                    };
                    (index, relative, outcome)
                }
            },
        ))
        .buffer_unordered(concurrency);

        let mut report = BatchReport {
            total,
            ..BatchReport::default()
        };
        let mut completed = vec![false; total];
        let mut done = 0usize;

        while let Some((index, relative, outcome)) = results.next().await {
            debug_assert!(!completed[index], "duplicate completion for task {index}");
            completed[index] = true;
            done += 1;

            match outcome {
                Ok(sum) => {
                    self.insert(new_record(&relative, sum, version));
                    report.success += 1;
                }
                Err(reason) => {
                    warn!("excluding {relative} from tracking: {reason}");
                    report.failed += 1;
                }
            }

            if done % interval == 0 || done == total {
                if let Some(callback) = progress {
                    callback(done, total);
                }
            }
        }

        debug!(
            "tracked {}/{} file(s), {} failed",
            report.success, report.total, report.failed
        );
        report
    }

    /// Insert a prebuilt record, replacing any record at the same path.
    pub fn insert(&mut self, file: TrackedFile) {
        self.files.insert(normalize_path_key(&file.path), file);
    }

    /// Look up a record by relative path.
    #[must_use]
    pub fn get(&self, relative_path: &str) -> Option<&TrackedFile> {
        self.files.get(&normalize_path_key(relative_path))
    }

    /// Number of tracked records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the tracker holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Drain the tracker into a path-ordered record list for flushing.
    #[must_use]
    pub fn into_files(self) -> Vec<TrackedFile> {
        self.files.into_values().collect()
    }
}

/// Build a pristine tracked-file record from a fresh checksum.
fn new_record(relative_path: &str, sum: String, version: &str) -> TrackedFile {
    TrackedFile {
        path: normalize_path_key(relative_path),
        checksum: sum.clone(),
        base_checksum: Some(sum),
        ownership: Ownership::Kit,
        installed_version: version.to_string(),
    }
}

/// Single-file tracking error types.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// Path failed sandbox validation.
    #[error(transparent)]
    Path(#[from] crate::path::PathSecurityError),

    /// File cannot be read for checksumming.
    #[error(transparent)]
    Checksum(#[from] crate::checksum::ChecksumError),
}

/// Friendly result alias :3
pub type Result<T, E = TrackError> = std::result::Result<T, E>;
