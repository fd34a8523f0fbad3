// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content checksums and ownership classification.
//!
//! Oxikit decides what it may touch by comparing content checksums, never by
//! timestamps or heuristics. Each tracked file carries the hash recorded at
//! install time plus an optional __baseline__ hash from the last sync point.
//! Comparing the file's current hash against that baseline answers the only
//! question that matters: has the user edited this file since we last wrote
//! it?
//!
//! # Ownership States
//!
//! - [`Ownership::Kit`]: installed by oxikit and byte-identical to what was
//!   last written. Safe to overwrite or delete.
//! - [`Ownership::KitModified`]: installed by oxikit, since edited by the
//!   user. Never overwritten without review, never deleted without force.
//! - [`Ownership::User`]: not tracked by any kit. Oxikit never touches it.
//!
//! A file only ever moves from [`Ownership::Kit`] to
//! [`Ownership::KitModified`] by detection. Nothing automatically promotes a
//! file back to pristine; only a sync that rewrites the file and records a
//! fresh baseline does that.
//!
//! The classification in [`classify`] is the single comparison backing sync
//! planning, merge-time conflict detection, and uninstall classification.
//! All three call sites go through it so ownership decisions cannot drift
//! apart.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

/// Per-file provenance classification.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ownership {
    /// Installed by oxikit, untouched since.
    #[default]
    Kit,

    /// Installed by oxikit, edited by the user since.
    KitModified,

    /// Created by the user, not tracked by any kit.
    User,
}

impl Display for Ownership {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Kit => fmt.write_str("kit"),
            Self::KitModified => fmt.write_str("kit-modified"),
            Self::User => fmt.write_str("user"),
        }
    }
}

/// Compute SHA-256 checksum of raw bytes as lowercase hex.
#[must_use]
pub fn checksum_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Compute SHA-256 checksum of a file's raw bytes.
///
/// # Errors
///
/// - Return [`ChecksumError`] if the file cannot be read.
pub async fn checksum_file(path: impl AsRef<Path>) -> Result<String> {
    let content = tokio::fs::read(path.as_ref())
        .await
        .map_err(|err| ChecksumError {
            source: err,
            path: path.as_ref().to_path_buf(),
        })?;

    Ok(checksum_bytes(&content))
}

/// Blocking variant of [`checksum_file`] for synchronous call sites.
///
/// # Errors
///
/// - Return [`ChecksumError`] if the file cannot be read.
pub fn checksum_file_sync(path: impl AsRef<Path>) -> Result<String> {
    let content = std::fs::read(path.as_ref()).map_err(|err| ChecksumError {
        source: err,
        path: path.as_ref().to_path_buf(),
    })?;

    Ok(checksum_bytes(&content))
}

/// Classify a tracked file's ownership from checksums.
///
/// A file absent from the manifest has no recorded checksum and is
/// [`Ownership::User`]. A recorded file whose current checksum matches its
/// baseline is [`Ownership::Kit`]; anything else is
/// [`Ownership::KitModified`].
///
/// The baseline is `base_checksum` when present, falling back to
/// `recorded_checksum` for files tracked before baselines were recorded. The
/// fallback means "modified since the checksum was recorded", which is the
/// exact semantic every caller relies on.
#[must_use]
pub fn classify(
    current_checksum: &str,
    recorded_checksum: Option<&str>,
    base_checksum: Option<&str>,
) -> Ownership {
    let Some(recorded) = recorded_checksum else {
        return Ownership::User;
    };

    let baseline = base_checksum.unwrap_or(recorded);
    if current_checksum == baseline {
        Ownership::Kit
    } else {
        Ownership::KitModified
    }
}

/// A file could not be read for checksum computation.
///
/// During batch tracking this is counted and logged, the file is excluded
/// from the tracked set, and the batch continues.
#[derive(Debug, thiserror::Error)]
#[error("failed to read {} for checksum", path.display())]
pub struct ChecksumError {
    #[source]
    pub source: std::io::Error,
    pub path: PathBuf,
}

/// Friendly result alias :3
pub type Result<T, E = ChecksumError> = std::result::Result<T, E>;
