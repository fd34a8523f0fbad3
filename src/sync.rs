// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Update planning for installed kits.
//!
//! Given the tracked files of an installed kit, a local installation root,
//! and an extracted upstream release tree, the planner partitions every
//! file into one of three buckets:
//!
//! - __auto update__: safe to write the upstream version without asking.
//! - __needs review__: the user edited the file since install; upstream
//!   changes must go through interactive hunk review before any write.
//! - __skipped__: not touched at all, each skip individually explainable.
//!
//! The partitions are mutually exclusive and exhaustive over the kit's
//! tracked files, and planning is read-only: nothing is written, so the
//! same inputs always produce the same plan.
//!
//! # Decision Order
//!
//! For each tracked file, in order:
//!
//! 1. `user` ownership skips unconditionally. User files are never synced
//!    and never even checksummed.
//! 2. The path must validate against both the upstream and local roots.
//!    Validation failure skips the file with a warning; one bad path never
//!    aborts the batch.
//! 3. No upstream copy, nothing to sync from: skip.
//! 4. No local copy: creating a file overwrites nothing, auto update.
//! 5. Pristine `kit` ownership always takes the new version: auto update.
//! 6. Otherwise compare the local content's checksum against the recorded
//!    baseline: unmodified since install auto updates, modified needs
//!    review.

use crate::{
    checksum::{self, Ownership},
    manifest::TrackedFile,
    path,
};

use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Partition of a kit's tracked files for one sync run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    /// Files to write without review.
    pub auto_update: Vec<TrackedFile>,

    /// Files requiring interactive hunk review before any write.
    pub needs_review: Vec<TrackedFile>,

    /// Files left untouched.
    pub skipped: Vec<TrackedFile>,
}

impl SyncPlan {
    /// Total number of files across all partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.auto_update.len() + self.needs_review.len() + self.skipped.len()
    }

    /// Whether the plan covers no files at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition a kit's tracked files against an upstream release tree.
///
/// Read-only and infallible as a whole: per-file problems (path security,
/// unreadable content) fail closed into `skipped` with a logged reason.
#[instrument(skip(tracked_files), level = "debug")]
pub async fn create_sync_plan(
    tracked_files: &[TrackedFile],
    local_root: &Path,
    upstream_root: &Path,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for file in tracked_files {
        // INVARIANT: User files are skipped before any path or content
        // inspection happens.
        if file.ownership == Ownership::User {
            debug!("skipping {}: user owned", file.path);
            plan.skipped.push(file.clone());
            continue;
        }

        let upstream_path = match path::validate(upstream_root, &file.path) {
            Ok(path) => path,
            Err(err) => {
                warn!("skipping {}: {err}", file.path);
                plan.skipped.push(file.clone());
                continue;
            }
        };
        let local_path = match path::validate(local_root, &file.path) {
            Ok(path) => path,
            Err(err) => {
                warn!("skipping {}: {err}", file.path);
                plan.skipped.push(file.clone());
                continue;
            }
        };

        if !file_exists(&upstream_path).await {
            debug!("skipping {}: no upstream copy shipped", file.path);
            plan.skipped.push(file.clone());
            continue;
        }

        if !file_exists(&local_path).await {
            debug!("auto updating {}: local copy missing, creation is safe", file.path);
            plan.auto_update.push(file.clone());
            continue;
        }

        if file.ownership == Ownership::Kit {
            plan.auto_update.push(file.clone());
            continue;
        }

        // Recorded as modified, or tracked before baselines existed:
        // trust the content, not the record.
        match checksum::checksum_file(&local_path).await {
            Ok(current) => {
                let state = checksum::classify(
                    &current,
                    Some(&file.checksum),
                    file.base_checksum.as_deref(),
                );
                if state == Ownership::Kit {
                    debug!("auto updating {}: unmodified since install", file.path);
                    plan.auto_update.push(file.clone());
                } else {
                    debug!("review needed for {}: local edits detected", file.path);
                    plan.needs_review.push(file.clone());
                }
            }
            Err(err) => {
                warn!("skipping {}: {err}", file.path);
                plan.skipped.push(file.clone());
            }
        }
    }

    info!(
        "sync plan: {} auto update, {} need review, {} skipped",
        plan.auto_update.len(),
        plan.needs_review.len(),
        plan.skipped.len()
    );
    plan
}

/// Existence check that does not follow symlinks.
async fn file_exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}
