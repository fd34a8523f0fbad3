// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Removal classification for installed kits.
//!
//! Uninstalling is the one operation where a wrong decision is
//! unrecoverable, so every file gets an explicit disposition with a
//! human-readable reason before anything is deleted. The analyzer consumes
//! manifest data and produces a delete/preserve split that a deletion
//! executor (or a dry-run renderer) can act on directly.
//!
//! # Classification
//!
//! Per tracked file, through the same checksum comparison that backs sync
//! planning:
//!
//! - pristine kit files are deleted;
//! - user-modified kit files are preserved, unless the caller forces the
//!   overwrite;
//! - user-owned files and registered user config files are always
//!   preserved;
//! - files shared with another still-installed kit are preserved
//!   regardless of ownership, since shared resources outlive any single
//!   kit's removal.
//!
//! Kit-scoped removal keeps the manifest document itself alive while other
//! kits remain. Legacy installations that never recorded per-file state
//! fall back to coarse directory-granularity deletion against a fixed
//! preserve allowlist.

use crate::{
    checksum::{self, Ownership},
    manifest::{self, MANIFEST_DIR, MANIFEST_FILE},
    path,
};

use glob::Pattern;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Allowlist of top-level patterns preserved by legacy coarse removal.
pub const LEGACY_PRESERVE_PATTERNS: &[&str] = &[".*", "*.local.*", "*.user.*"];

/// Why a file ended up on its side of the delete/preserve split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionReason {
    /// Installed by the kit and unmodified.
    Pristine,

    /// User-modified, deleted anyway at the caller's explicit request.
    ForceOverwrite,

    /// Installed by the kit, edited by the user since.
    UserModified,

    /// Not tracked by any kit.
    UserOwned,

    /// Registered in the manifest's user config list.
    UserConfig,

    /// Referenced by another still-installed kit.
    SharedWithOtherKit,

    /// Manifest document stays while other kits remain installed.
    ManifestRetained,

    /// Manifest document goes with the last kit.
    ManifestObsolete,

    /// Well-known directory of a legacy install without file tracking.
    LegacyDirectory,

    /// Matched the legacy preserve allowlist.
    PreservedPattern,

    /// Path failed sandbox validation; refusing to touch it.
    SecuritySkip,

    /// Content could not be read for verification; kept to be safe.
    Unverifiable,
}

impl Display for ActionReason {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let text = match self {
            Self::Pristine => "pristine kit file",
            Self::ForceOverwrite => "force overwrite",
            Self::UserModified => "modified by user",
            Self::UserOwned => "user owned",
            Self::UserConfig => "registered user config",
            Self::SharedWithOtherKit => "shared with other kit",
            Self::ManifestRetained => "other kits still installed",
            Self::ManifestObsolete => "last kit removed",
            Self::LegacyDirectory => "legacy kit directory",
            Self::PreservedPattern => "matches preserve pattern",
            Self::SecuritySkip => "path failed security validation",
            Self::Unverifiable => "content could not be verified",
        };
        fmt.write_str(text)
    }
}

/// One file's disposition with its reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAction {
    /// Relative path under the installation root.
    pub path: String,

    /// Why the file landed where it did.
    pub reason: ActionReason,
}

/// Full delete/preserve split for a removal.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UninstallAnalysis {
    /// Files (or legacy directories) to delete.
    pub to_delete: Vec<FileAction>,

    /// Files to leave in place.
    pub to_preserve: Vec<FileAction>,

    /// Kits that stay installed after this removal.
    pub remaining_kits: Vec<String>,
}

/// Classify every file of a full or kit-scoped removal.
///
/// `kit_id` of `None` analyzes removal of everything oxikit tracks under
/// the root. Read-only: nothing is deleted or locked here.
#[instrument(level = "debug")]
pub async fn analyze_installation(
    root: &Path,
    kit_id: Option<&str>,
    force_overwrite: bool,
) -> UninstallAnalysis {
    let document = manifest::read_manifest(root).await;
    let Some(view) = manifest::get_uninstall_manifest(root, kit_id).await else {
        // A missing kit inside a healthy manifest is "nothing to remove",
        // not a license to fall back to coarse deletion.
        if let Some(document) = document {
            warn!(
                "kit {:?} is not installed under {}, nothing to remove",
                kit_id.unwrap_or("<all>"),
                root.display()
            );
            return UninstallAnalysis {
                remaining_kits: document.kits.keys().cloned().collect(),
                ..UninstallAnalysis::default()
            };
        }

        info!("no usable manifest under {}, using legacy analysis", root.display());
        return analyze_legacy(root).await;
    };

    let user_config = document
        .map(|document| document.user_config_files)
        .unwrap_or_default();

    let mut analysis = UninstallAnalysis {
        remaining_kits: view.remaining_kits.clone(),
        ..UninstallAnalysis::default()
    };

    for file in &view.shared {
        analysis.to_preserve.push(FileAction {
            path: file.path.clone(),
            reason: ActionReason::SharedWithOtherKit,
        });
    }

    for file in &view.files {
        if user_config.contains(&file.path) {
            analysis.to_preserve.push(FileAction {
                path: file.path.clone(),
                reason: ActionReason::UserConfig,
            });
            continue;
        }

        if file.ownership == Ownership::User {
            analysis.to_preserve.push(FileAction {
                path: file.path.clone(),
                reason: ActionReason::UserOwned,
            });
            continue;
        }

        let absolute = match path::validate(root, &file.path) {
            Ok(path) => path,
            Err(err) => {
                warn!("preserving {}: {err}", file.path);
                analysis.to_preserve.push(FileAction {
                    path: file.path.clone(),
                    reason: ActionReason::SecuritySkip,
                });
                continue;
            }
        };

        match tokio::fs::symlink_metadata(&absolute).await {
            Ok(_) => {}
            Err(_) => {
                debug!("{} already absent, nothing to remove", file.path);
                continue;
            }
        }

        let current = match checksum::checksum_file(&absolute).await {
            Ok(sum) => sum,
            Err(err) => {
                warn!("preserving {}: {err}", file.path);
                analysis.to_preserve.push(FileAction {
                    path: file.path.clone(),
                    reason: ActionReason::Unverifiable,
                });
                continue;
            }
        };

        let state = checksum::classify(
            &current,
            Some(&file.checksum),
            file.base_checksum.as_deref(),
        );
        match state {
            Ownership::Kit => analysis.to_delete.push(FileAction {
                path: file.path.clone(),
                reason: ActionReason::Pristine,
            }),
            _ if force_overwrite => analysis.to_delete.push(FileAction {
                path: file.path.clone(),
                reason: ActionReason::ForceOverwrite,
            }),
            _ => analysis.to_preserve.push(FileAction {
                path: file.path.clone(),
                reason: ActionReason::UserModified,
            }),
        }
    }

    // Kits migrated from legacy documents contribute coarse directories.
    for dir in &view.legacy_dirs {
        if tokio::fs::metadata(root.join(dir)).await.is_ok() {
            analysis.to_delete.push(FileAction {
                path: dir.clone(),
                reason: ActionReason::LegacyDirectory,
            });
        }
    }

    let manifest_rel = format!("{MANIFEST_DIR}/{MANIFEST_FILE}");
    if analysis.remaining_kits.is_empty() {
        analysis.to_delete.push(FileAction {
            path: manifest_rel,
            reason: ActionReason::ManifestObsolete,
        });
    } else {
        analysis.to_preserve.push(FileAction {
            path: manifest_rel,
            reason: ActionReason::ManifestRetained,
        });
    }

    info!(
        "uninstall analysis: {} to delete, {} to preserve",
        analysis.to_delete.len(),
        analysis.to_preserve.len()
    );
    analysis
}

/// Coarse analysis for roots without any manifest document.
///
/// Deletes the well-known kit directories at directory granularity and
/// preserves top-level entries matching the allowlist. Blunt, but the only
/// honest option without per-file history.
async fn analyze_legacy(root: &Path) -> UninstallAnalysis {
    let mut analysis = UninstallAnalysis::default();

    for dir in manifest::LEGACY_KIT_DIRS {
        if tokio::fs::metadata(root.join(dir)).await.is_ok() {
            analysis.to_delete.push(FileAction {
                path: (*dir).to_string(),
                reason: ActionReason::LegacyDirectory,
            });
        }
    }

    let patterns: Vec<Pattern> = LEGACY_PRESERVE_PATTERNS
        .iter()
        .filter_map(|pattern| Pattern::new(pattern).ok())
        .collect();

    let Ok(mut entries) = tokio::fs::read_dir(root).await else {
        return analysis;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if patterns.iter().any(|pattern| pattern.matches(&name)) {
            analysis.to_preserve.push(FileAction {
                path: name,
                reason: ActionReason::PreservedPattern,
            });
        }
    }

    analysis
}

/// Remove directories left empty by a deletion, walking toward the root.
///
/// Starts at the deleted file's parent and removes each level that is now
/// empty, stopping at the first non-empty directory or at the installation
/// root. The root itself is never removed. Returns how many directories
/// were removed.
pub async fn cleanup_empty_directories(deleted_file: &Path, installation_root: &Path) -> usize {
    let mut removed = 0;
    let Some(parent) = deleted_file.parent() else {
        return 0;
    };
    let mut dir: PathBuf = parent.to_path_buf();

    loop {
        if dir == installation_root || !dir.starts_with(installation_root) {
            break;
        }

        if !is_empty_dir(&dir).await {
            break;
        }

        if tokio::fs::remove_dir(&dir).await.is_err() {
            // Lost a race with a concurrent write; leave it be.
            break;
        }
        debug!("removed empty directory {}", dir.display());
        removed += 1;

        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }

    removed
}

async fn is_empty_dir(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}
