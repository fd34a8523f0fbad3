// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Kit definition layout and upstream tree scanning.
//!
//! A __kit__ is a named, versioned bundle of installable text artifacts:
//! command templates, agent instructions, rule files, skills. A release of a
//! kit arrives as an extracted directory tree whose top level carries a
//! definition file named `kit.toml`.
//!
//! # Definition Layout
//!
//! The definition holds the settings oxikit needs before it can install
//! anything: the kit's identifier, its version string, a one line
//! description, and an optional listing of include patterns restricting
//! which files of the tree actually ship. A tree without a valid `kit.toml`
//! is not a kit.
//!
//! File I/O is left to the caller where practical; the definition itself
//! parses from and serializes to plain strings, the same way other oxikit
//! configuration does.

use crate::path::normalize_path_key;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, warn};

/// File name of the kit definition at the top of an upstream tree.
pub const KIT_FILE_NAME: &str = "kit.toml";

/// Kit definition layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct KitDefinition {
    /// Settings for the kit.
    pub settings: KitSettings,
}

/// Kit configuration settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct KitSettings {
    /// Kit identifier, unique per installation root.
    pub name: String,

    /// Version string of this release.
    pub version: String,

    /// Brief description of what the kit contains.
    pub description: String,

    /// Optional listing of glob patterns restricting installable files.
    pub include: Option<Vec<String>>,
}

impl FromStr for KitDefinition {
    type Err = KitError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let definition: KitDefinition = toml::de::from_str(data).map_err(KitError::Deserialize)?;

        // INVARIANT: The kit name keys manifest entries and may appear in
        // file paths, so it must be a plain single-segment identifier.
        let name = &definition.settings.name;
        if name.is_empty()
            || name.contains(['/', '\\', '\0'])
            || name == "."
            || name == ".."
        {
            return Err(KitError::InvalidName { name: name.clone() });
        }

        if definition.settings.version.is_empty() {
            return Err(KitError::MissingVersion);
        }

        Ok(definition)
    }
}

impl Display for KitDefinition {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(|_| FmtError)?
                .as_str(),
        )
    }
}

impl KitDefinition {
    /// Load kit definition from the top of an extracted upstream tree.
    ///
    /// # Errors
    ///
    /// - Return [`KitError::MissingDefinition`] if `kit.toml` is absent.
    /// - Return [`KitError::Deserialize`] if it does not parse.
    pub async fn load(upstream_root: impl AsRef<Path>) -> Result<Self> {
        let path = upstream_root.as_ref().join(KIT_FILE_NAME);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(KitError::MissingDefinition { path })
            }
            Err(err) => return Err(KitError::Scan { source: err, path }),
        };

        data.parse()
    }
}

/// Enumerate installable files of an extracted upstream tree.
///
/// Walks the tree, skipping the definition file itself, directories, and
/// symlinks (a release tree has no business containing links). Results are
/// relative forward-slash-normalized paths, sorted for deterministic
/// planning. When the definition carries include patterns, only files
/// matching at least one pattern are kept.
///
/// # Errors
///
/// - Return [`KitError::BadPattern`] for an unparsable include pattern.
/// - Return [`KitError::Scan`] if a directory cannot be read.
pub fn scan_upstream(
    upstream_root: impl AsRef<Path>,
    include: Option<&[String]>,
) -> Result<Vec<String>> {
    let root = upstream_root.as_ref();
    let patterns = include
        .map(|patterns| {
            patterns
                .iter()
                .map(|pattern| Pattern::new(pattern))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(KitError::BadPattern)?;

    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|err| KitError::Scan {
            source: err,
            path: dir.clone(),
        })?;

        for entry in entries {
            let entry = entry.map_err(|err| KitError::Scan {
                source: err,
                path: dir.clone(),
            })?;
            let path = entry.path();
            let meta = std::fs::symlink_metadata(&path).map_err(|err| KitError::Scan {
                source: err,
                path: path.clone(),
            })?;

            if meta.file_type().is_symlink() {
                warn!("skipping symlink {} in upstream tree", path.display());
                continue;
            }

            if meta.is_dir() {
                pending.push(path);
                continue;
            }

            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            let key = normalize_path_key(&relative);

            if key == KIT_FILE_NAME {
                continue;
            }

            if let Some(patterns) = &patterns {
                if !patterns.iter().any(|pattern| pattern.matches(&key)) {
                    debug!("{key} does not match any include pattern");
                    continue;
                }
            }

            files.push(key);
        }
    }

    files.sort();
    Ok(files)
}

/// Kit definition and upstream scanning error types.
#[derive(Debug, thiserror::Error)]
pub enum KitError {
    /// Failed to deserialize kit definition.
    #[error(transparent)]
    Deserialize(toml::de::Error),

    /// Kit name unusable as an identifier.
    #[error("kit name {name:?} is not a valid identifier")]
    InvalidName { name: String },

    /// Kit definition lacks a version string.
    #[error("kit definition has no version")]
    MissingVersion,

    /// Upstream tree has no definition file.
    #[error("no {KIT_FILE_NAME} found at {}", path.display())]
    MissingDefinition { path: PathBuf },

    /// Include pattern does not parse.
    #[error(transparent)]
    BadPattern(#[from] glob::PatternError),

    /// Upstream tree cannot be walked.
    #[error("failed to scan upstream tree at {}", path.display())]
    Scan {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = KitError> = std::result::Result<T, E>;
