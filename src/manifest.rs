// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Manifest document management and manipulation.
//!
//! The manifest is the sole source of truth for what oxikit owns inside an
//! installation root. It lives at `<root>/.oxikit/manifest.json` and records
//! every installed kit with its version, install time, and tracked files,
//! each file carrying the checksums that back ownership classification.
//!
//! # Document Layout
//!
//! The document is camelCase JSON. File tracking lives exclusively under
//! `kits[id].files`; the top-level `name`/`version`/`installedAt` fields
//! exist only so documents migrated from the old single-kit schema keep
//! displaying something sensible, and new writes never populate the old
//! top-level file lists. Two sources of truth for the same file diverge
//! eventually, so there is exactly one.
//!
//! # Legacy Migration
//!
//! Before multi-kit support, the document was a single flat record with
//! top-level `files` (or, even earlier, a bare `installedFiles` path list).
//! [`read_manifest`] transparently lifts such documents into the multi-kit
//! schema in memory; [`write_manifest`] persists the lifted form the next
//! time any kit is written, inside the same lock as the write itself. A
//! migration that cannot recover per-file history degrades gracefully: the
//! affected files are kept with conservative ownership instead of blocking
//! the install.
//!
//! # Locking
//!
//! Every read-modify-write of the document happens under the exclusive
//! advisory lock in [`lock`], so concurrent installs of different kits
//! cannot clobber each other's entries. Plain reads take no lock; they
//! parse, schema-validate, and treat any validation failure as "no
//! manifest" rather than crashing on a corrupted document.

pub mod lock;
pub mod track;

use crate::checksum::Ownership;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Directory under the installation root holding oxikit state.
pub const MANIFEST_DIR: &str = ".oxikit";

/// Manifest document file name.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Well-known top-level directories used by legacy installs without
/// per-file tracking.
pub const LEGACY_KIT_DIRS: &[&str] = &["commands", "agents", "rules", "skills"];

/// One tracked file of an installed kit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedFile {
    /// Relative forward-slash-normalized path, unique within a kit.
    pub path: String,

    /// Content hash of the pristine or last-synced content.
    pub checksum: String,

    /// Hash at the last sync point. Falls back to `checksum` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_checksum: Option<String>,

    /// Provenance classification.
    pub ownership: Ownership,

    /// Kit version that installed this file.
    pub installed_version: String,
}

/// Metadata for one installed kit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KitMetadata {
    /// Installed version of the kit.
    pub version: String,

    /// When this kit was installed or last updated.
    pub installed_at: DateTime<Utc>,

    /// Tracked files of the kit. `None` on documents migrated from legacy
    /// schemas that never recorded per-file state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<TrackedFile>>,
}

/// Installation scope of a manifest document.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Project-local installation root.
    #[default]
    Local,

    /// Home-directory installation root.
    Global,
}

impl Display for Scope {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Local => fmt.write_str("local"),
            Self::Global => fmt.write_str("global"),
        }
    }
}

/// The manifest document.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Installed kits keyed by kit identifier.
    #[serde(default)]
    pub kits: BTreeMap<String, KitMetadata>,

    /// Scope this manifest was written for.
    #[serde(default)]
    pub scope: Scope,

    /// User-registered config files that removal must always preserve.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_config_files: Vec<String>,

    /// Legacy top-level display fields, retained for migrated documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
}

impl Metadata {
    /// Look up one kit's tracked files, empty when untracked.
    #[must_use]
    pub fn kit_files(&self, kit_id: &str) -> &[TrackedFile] {
        self.kits
            .get(kit_id)
            .and_then(|kit| kit.files.as_deref())
            .unwrap_or_default()
    }
}

/// Pre-multi-kit document layout, deserialization only.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMetadata {
    name: Option<String>,
    version: Option<String>,
    installed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    scope: Option<Scope>,
    #[serde(default)]
    files: Option<Vec<TrackedFile>>,
    #[serde(default)]
    installed_files: Option<Vec<String>>,
    #[serde(default)]
    user_config_files: Vec<String>,
}

/// View of what removing a kit (or everything) would touch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UninstallManifest {
    /// Files exclusively owned by the removal target.
    pub files: Vec<TrackedFile>,

    /// Files also referenced by other installed kits; preserved.
    pub shared: Vec<TrackedFile>,

    /// Kits that stay installed after the removal.
    pub remaining_kits: Vec<String>,

    /// Well-known directories to fall back on for legacy installs that
    /// never recorded per-file state. Empty for tracked installs.
    pub legacy_dirs: Vec<String>,
}

/// Absolute path of the oxikit state directory under a root.
#[must_use]
pub fn manifest_dir(root: &Path) -> PathBuf {
    root.join(MANIFEST_DIR)
}

/// Absolute path of the manifest document under a root.
#[must_use]
pub fn manifest_path(root: &Path) -> PathBuf {
    manifest_dir(root).join(MANIFEST_FILE)
}

/// Read and schema-validate the manifest document.
///
/// Returns `None` on a missing document and on any parse or validation
/// failure; a corrupted manifest must degrade to "nothing installed", not
/// crash every caller. Legacy single-kit documents are lifted into the
/// multi-kit schema in memory; nothing is written back here.
pub async fn read_manifest(root: &Path) -> Option<Metadata> {
    let path = manifest_path(root);
    let data = match tokio::fs::read_to_string(&path).await {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!("failed to read manifest at {}: {err}", path.display());
            return None;
        }
    };

    parse_manifest(&data).or_else(|| {
        warn!("manifest at {} failed validation, treating as absent", path.display());
        None
    })
}

/// Read one kit's metadata from the manifest document.
pub async fn read_kit_manifest(root: &Path, kit_id: &str) -> Option<KitMetadata> {
    read_manifest(root).await?.kits.get(kit_id).cloned()
}

/// Parse a manifest document, migrating legacy layouts in memory.
fn parse_manifest(data: &str) -> Option<Metadata> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;

    if value.get("kits").is_some() {
        return serde_json::from_value(value).ok();
    }

    let legacy: LegacyMetadata = serde_json::from_value(value).ok()?;
    Some(migrate_legacy(legacy))
}

/// Lift a pre-multi-kit document into the multi-kit schema.
///
/// The old flat `files` list becomes the single kit's tracked files. The
/// even older `installedFiles` path list has no checksums to carry over;
/// those files are kept with conservative `kit-modified` ownership so
/// nothing downstream auto-deletes what it cannot verify. Losing that
/// history is logged, not fatal.
fn migrate_legacy(legacy: LegacyMetadata) -> Metadata {
    let kit_id = legacy.name.clone().unwrap_or_else(|| "default".to_string());
    let version = legacy.version.clone().unwrap_or_else(|| "0.0.0".to_string());

    let files = match (legacy.files, legacy.installed_files) {
        (Some(files), _) => Some(files),
        (None, Some(paths)) => {
            warn!(
                "legacy manifest lists {} file path(s) without checksums, \
                 keeping them with conservative ownership",
                paths.len()
            );
            Some(
                paths
                    .into_iter()
                    .map(|path| TrackedFile {
                        path,
                        checksum: String::new(),
                        base_checksum: None,
                        ownership: Ownership::KitModified,
                        installed_version: version.clone(),
                    })
                    .collect(),
            )
        }
        (None, None) => None,
    };

    debug!("migrated legacy manifest into kit {kit_id:?}");
    let mut kits = BTreeMap::new();
    kits.insert(
        kit_id,
        KitMetadata {
            version,
            installed_at: legacy.installed_at.unwrap_or_else(Utc::now),
            files,
        },
    );

    Metadata {
        kits,
        scope: legacy.scope.unwrap_or_default(),
        user_config_files: legacy.user_config_files,
        name: legacy.name,
        version: legacy.version,
        installed_at: legacy.installed_at,
    }
}

/// Write one kit's metadata into the manifest document.
///
/// The whole read-migrate-merge-write sequence runs under the exclusive
/// manifest lock, so two processes installing different kits concurrently
/// serialize instead of corrupting each other's entries. Legacy documents
/// are migrated to the multi-kit schema as part of the same write.
///
/// # Errors
///
/// - Return [`ManifestError::Lock`] if the lock cannot be acquired; callers
///   must not proceed without it.
/// - Return [`ManifestError::Io`] if the document cannot be persisted.
#[instrument(skip(files), level = "debug")]
pub async fn write_manifest(
    root: &Path,
    kit_id: &str,
    version: &str,
    scope: Scope,
    files: Vec<TrackedFile>,
) -> Result<()> {
    let dir = manifest_dir(root);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|err| ManifestError::Io {
            source: err,
            path: dir.clone(),
        })?;

    let path = manifest_path(root);
    let _guard = lock::acquire(&path).await?;

    let mut document = read_manifest(root).await.unwrap_or_default();
    document.scope = scope;
    document.kits.insert(
        kit_id.to_string(),
        KitMetadata {
            version: version.to_string(),
            installed_at: Utc::now(),
            files: Some(files),
        },
    );

    persist(&path, &document).await
}

/// Remove one kit's entry from the manifest document.
///
/// Runs under the same locking discipline as [`write_manifest`]. Returns
/// the number of kits remaining; when zero the caller is expected to delete
/// the manifest document (and state directory) entirely.
///
/// # Errors
///
/// - Return [`ManifestError::Lock`] if the lock cannot be acquired.
/// - Return [`ManifestError::Io`] if the document cannot be persisted.
#[instrument(level = "debug")]
pub async fn remove_kit_from_manifest(root: &Path, kit_id: &str) -> Result<usize> {
    let path = manifest_path(root);
    let _guard = lock::acquire(&path).await?;

    let Some(mut document) = read_manifest(root).await else {
        return Ok(0);
    };

    if document.kits.remove(kit_id).is_none() {
        warn!("kit {kit_id:?} not present in manifest, nothing to remove");
    }

    let remaining = document.kits.len();
    persist(&path, &document).await?;
    Ok(remaining)
}

/// Compute what removing a kit (or everything) would delete or preserve.
///
/// For a kit-scoped removal, the target kit's files minus any paths also
/// referenced by other installed kits; the shared remainder is preserved.
/// For a full removal, the union of every kit's files. Kits migrated from
/// legacy documents without per-file tracking contribute the well-known
/// top-level directories instead. Read-only: takes no lock, writes nothing.
pub async fn get_uninstall_manifest(
    root: &Path,
    kit_id: Option<&str>,
) -> Option<UninstallManifest> {
    let document = read_manifest(root).await?;

    match kit_id {
        Some(kit_id) => {
            let kit = document.kits.get(kit_id)?;
            let remaining_kits: Vec<String> = document
                .kits
                .keys()
                .filter(|id| id.as_str() != kit_id)
                .cloned()
                .collect();

            let Some(files) = &kit.files else {
                return Some(UninstallManifest {
                    remaining_kits,
                    legacy_dirs: LEGACY_KIT_DIRS.iter().map(ToString::to_string).collect(),
                    ..UninstallManifest::default()
                });
            };

            let other_paths: BTreeSet<&str> = document
                .kits
                .iter()
                .filter(|(id, _)| id.as_str() != kit_id)
                .flat_map(|(_, kit)| kit.files.iter().flatten())
                .map(|file| file.path.as_str())
                .collect();

            let (shared, exclusive): (Vec<TrackedFile>, Vec<TrackedFile>) = files
                .iter()
                .cloned()
                .partition(|file| other_paths.contains(file.path.as_str()));

            Some(UninstallManifest {
                files: exclusive,
                shared,
                remaining_kits,
                legacy_dirs: Vec::new(),
            })
        }
        None => {
            let mut seen = BTreeSet::new();
            let mut files = Vec::new();
            let mut legacy = false;

            for kit in document.kits.values() {
                match &kit.files {
                    Some(tracked) => {
                        for file in tracked {
                            if seen.insert(file.path.clone()) {
                                files.push(file.clone());
                            }
                        }
                    }
                    None => legacy = true,
                }
            }

            let legacy_dirs = if legacy {
                LEGACY_KIT_DIRS.iter().map(ToString::to_string).collect()
            } else {
                Vec::new()
            };

            Some(UninstallManifest {
                files,
                shared: Vec::new(),
                remaining_kits: Vec::new(),
                legacy_dirs,
            })
        }
    }
}

/// Serialize and write the document.
async fn persist(path: &Path, document: &Metadata) -> Result<()> {
    let json = serde_json::to_string_pretty(document).map_err(ManifestError::Serialize)?;
    tokio::fs::write(path, json)
        .await
        .map_err(|err| ManifestError::Io {
            source: err,
            path: path.to_path_buf(),
        })
}

/// Manifest document error types.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Manifest lock cannot be acquired.
    #[error(transparent)]
    Lock(#[from] lock::LockAcquisitionError),

    /// Document cannot be serialized.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// Document or state directory cannot be read or written.
    #[error("failed to access {}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ManifestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn tracked(path: &str, checksum: &str) -> TrackedFile {
        TrackedFile {
            path: path.into(),
            checksum: checksum.into(),
            base_checksum: Some(checksum.into()),
            ownership: Ownership::Kit,
            installed_version: "1.0.0".into(),
        }
    }

    #[tokio::test]
    async fn read_manifest_missing_document() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        assert_eq!(read_manifest(temp.path()).await, None);
        Ok(())
    }

    #[tokio::test]
    async fn read_manifest_invalid_document() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        tokio::fs::create_dir_all(manifest_dir(temp.path())).await?;
        tokio::fs::write(manifest_path(temp.path()), "{ not json").await?;

        assert_eq!(read_manifest(temp.path()).await, None);
        Ok(())
    }

    #[tokio::test]
    async fn write_then_read_round_trip() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let files = vec![tracked("commands/review.md", "abc")];
        write_manifest(temp.path(), "engineer", "1.0.0", Scope::Local, files.clone()).await?;

        let document = read_manifest(temp.path()).await.expect("manifest should exist");
        assert_eq!(document.scope, Scope::Local);
        assert_eq!(document.kit_files("engineer"), files.as_slice());
        Ok(())
    }

    #[tokio::test]
    async fn write_manifest_merges_kits() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_manifest(
            temp.path(),
            "engineer",
            "1.0.0",
            Scope::Local,
            vec![tracked("a.md", "a")],
        )
        .await?;
        write_manifest(
            temp.path(),
            "marketing",
            "2.0.0",
            Scope::Local,
            vec![tracked("b.md", "b")],
        )
        .await?;

        let document = read_manifest(temp.path()).await.expect("manifest should exist");
        assert_eq!(document.kits.len(), 2);
        assert_eq!(document.kits["engineer"].version, "1.0.0");
        assert_eq!(document.kits["marketing"].version, "2.0.0");
        Ok(())
    }

    #[tokio::test]
    async fn manifest_json_uses_camel_case_and_no_legacy_file_lists() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_manifest(
            temp.path(),
            "engineer",
            "1.0.0",
            Scope::Local,
            vec![tracked("a.md", "a")],
        )
        .await?;

        let raw = tokio::fs::read_to_string(manifest_path(temp.path())).await?;
        assert!(raw.contains("installedAt"));
        assert!(raw.contains("installedVersion"));
        assert!(raw.contains("baseChecksum"));
        assert!(!raw.contains("installed_at"));
        // File tracking lives only under kits[id].files.
        assert!(!raw.contains("installedFiles"));
        Ok(())
    }

    #[tokio::test]
    async fn legacy_document_migrates_on_read() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        tokio::fs::create_dir_all(manifest_dir(temp.path())).await?;
        let legacy = indoc! {r#"
            {
              "name": "engineer",
              "version": "0.9.0",
              "installedAt": "2025-01-02T03:04:05Z",
              "files": [
                {
                  "path": "commands/review.md",
                  "checksum": "abc",
                  "ownership": "kit",
                  "installedVersion": "0.9.0"
                }
              ]
            }
        "#};
        tokio::fs::write(manifest_path(temp.path()), legacy).await?;

        let document = read_manifest(temp.path()).await.expect("legacy should migrate");
        assert_eq!(document.kits.len(), 1);
        assert_eq!(document.kits["engineer"].version, "0.9.0");
        assert_eq!(document.kit_files("engineer")[0].path, "commands/review.md");
        assert_eq!(document.name.as_deref(), Some("engineer"));
        Ok(())
    }

    #[tokio::test]
    async fn legacy_path_list_migrates_conservatively() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        tokio::fs::create_dir_all(manifest_dir(temp.path())).await?;
        let legacy = r#"{"name": "old", "installedFiles": ["rules/style.md"]}"#;
        tokio::fs::write(manifest_path(temp.path()), legacy).await?;

        let document = read_manifest(temp.path()).await.expect("legacy should migrate");
        let files = document.kit_files("old");
        assert_eq!(files[0].path, "rules/style.md");
        assert_eq!(files[0].ownership, Ownership::KitModified);
        Ok(())
    }

    #[tokio::test]
    async fn remove_kit_reports_remaining() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_manifest(temp.path(), "engineer", "1.0.0", Scope::Local, vec![]).await?;
        write_manifest(temp.path(), "marketing", "1.0.0", Scope::Local, vec![]).await?;

        assert_eq!(remove_kit_from_manifest(temp.path(), "engineer").await?, 1);
        assert_eq!(remove_kit_from_manifest(temp.path(), "marketing").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn uninstall_manifest_subtracts_shared_paths() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_manifest(
            temp.path(),
            "engineer",
            "1.0.0",
            Scope::Local,
            vec![tracked("a.md", "a"), tracked("shared.md", "s")],
        )
        .await?;
        write_manifest(
            temp.path(),
            "marketing",
            "1.0.0",
            Scope::Local,
            vec![tracked("shared.md", "s")],
        )
        .await?;

        let view = get_uninstall_manifest(temp.path(), Some("engineer"))
            .await
            .expect("view should exist");

        assert_eq!(view.files.len(), 1);
        assert_eq!(view.files[0].path, "a.md");
        assert_eq!(view.shared.len(), 1);
        assert_eq!(view.shared[0].path, "shared.md");
        assert_eq!(view.remaining_kits, vec!["marketing".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn uninstall_manifest_full_unions_all_kits() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_manifest(
            temp.path(),
            "engineer",
            "1.0.0",
            Scope::Local,
            vec![tracked("a.md", "a"), tracked("shared.md", "s")],
        )
        .await?;
        write_manifest(
            temp.path(),
            "marketing",
            "1.0.0",
            Scope::Local,
            vec![tracked("shared.md", "s"), tracked("b.md", "b")],
        )
        .await?;

        let view = get_uninstall_manifest(temp.path(), None)
            .await
            .expect("view should exist");

        let mut paths: Vec<&str> = view.files.iter().map(|file| file.path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["a.md", "b.md", "shared.md"]);
        assert!(view.remaining_kits.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn uninstall_manifest_legacy_falls_back_to_directories() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        tokio::fs::create_dir_all(manifest_dir(temp.path())).await?;
        let legacy = r#"{"name": "old", "version": "0.1.0"}"#;
        tokio::fs::write(manifest_path(temp.path()), legacy).await?;

        let view = get_uninstall_manifest(temp.path(), Some("old"))
            .await
            .expect("view should exist");

        assert!(view.files.is_empty());
        assert_eq!(view.legacy_dirs, LEGACY_KIT_DIRS);
        Ok(())
    }
}
