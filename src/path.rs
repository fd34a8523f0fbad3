// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution and sandboxing utilities.
//!
//! Every file that oxikit reads, writes, or deletes lives underneath an
//! __installation root__: either the current project directory, or the
//! user's home directory for global installs. Tracked file paths are stored
//! as relative, forward-slash-normalized strings, and they arrive from
//! sources we do not control (manifest documents on disk, extracted upstream
//! release trees). A hostile or corrupted path must never be able to reach
//! outside the root.
//!
//! # Validation Layers
//!
//! [`validate`] checks a candidate relative path in layers, cheapest first:
//!
//! 1. Shape: non-empty, no embedded null bytes, bounded length, not
//!    absolute, no `..` segments.
//! 2. Join: the candidate joined to the root must remain inside the root
//!    lexically.
//! 3. Symlink chain: if the candidate exists and is a symlink, the chain is
//!    walked hop by hop up to [`MAX_SYMLINK_DEPTH`] links. Each hop must
//!    resolve inside the root. The depth bound covers symlink cycles too.
//! 4. Real path: the canonicalized candidate (or its parent directory when
//!    the candidate does not exist yet) must remain inside the
//!    canonicalized root.
//!
//! Validation failure is a per-file condition. Callers are expected to skip
//! the offending file, log a warning, and continue the batch rather than
//! abort a whole sync or uninstall for one bad path.

use std::{
    fs,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use tracing::debug;

/// Upper bound on relative path length accepted by [`validate`].
pub const MAX_PATH_LENGTH: usize = 1024;

/// Upper bound on symlink chain hops followed by [`validate`].
pub const MAX_SYMLINK_DEPTH: usize = 20;

/// Validate relative path against an installation root.
///
/// Returns the absolute (joined, non-canonicalized) path on success, i.e.,
/// `validate(root, "a/b/c.md")` yields `root/a/b/c.md`.
///
/// # Errors
///
/// - Return [`PathSecurityError::EmptyPath`] for an empty candidate.
/// - Return [`PathSecurityError::NullByte`] for embedded null bytes.
/// - Return [`PathSecurityError::PathTooLong`] past [`MAX_PATH_LENGTH`].
/// - Return [`PathSecurityError::AbsolutePath`] for absolute candidates.
/// - Return [`PathSecurityError::Traversal`] for any `..` segment.
/// - Return [`PathSecurityError::SymlinkEscape`] if any hop of a symlink
///   chain resolves outside the root.
/// - Return [`PathSecurityError::SymlinkDepthExceeded`] if the chain is
///   longer than [`MAX_SYMLINK_DEPTH`].
/// - Return [`PathSecurityError::EscapesRoot`] if the joined or
///   canonicalized path lands outside the root.
pub fn validate(base_path: &Path, relative_path: &str) -> Result<PathBuf> {
    if relative_path.is_empty() {
        return Err(PathSecurityError::EmptyPath);
    }

    if relative_path.contains('\0') {
        return Err(PathSecurityError::NullByte {
            path: relative_path.replace('\0', "\\0"),
        });
    }

    if relative_path.len() > MAX_PATH_LENGTH {
        return Err(PathSecurityError::PathTooLong {
            length: relative_path.len(),
        });
    }

    let candidate = Path::new(relative_path);
    if candidate.is_absolute() || candidate.has_root() {
        return Err(PathSecurityError::AbsolutePath {
            path: relative_path.into(),
        });
    }

    // INVARIANT: No `..` segment anywhere, so the lexical normalization
    // below can never begin with `..` either.
    if candidate
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(PathSecurityError::Traversal {
            path: relative_path.into(),
        });
    }

    let base = normalize_lexically(base_path);
    let joined = normalize_lexically(&base_path.join(candidate));
    if joined.strip_prefix(&base).is_err() {
        return Err(PathSecurityError::EscapesRoot {
            path: relative_path.into(),
        });
    }

    walk_symlink_chain(&base, &joined)?;
    check_real_path(&base, &joined)?;

    Ok(base_path.join(candidate))
}

/// Follow symlink chain at candidate path, bounding depth and escapes.
fn walk_symlink_chain(base: &Path, candidate: &Path) -> Result<()> {
    let mut current = candidate.to_path_buf();

    for _ in 0..MAX_SYMLINK_DEPTH {
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {}
            // INVARIANT: A non-link or missing file ends the chain.
            Ok(_) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(PathSecurityError::Inspect {
                    source: err,
                    path: current,
                })
            }
        }

        let target = fs::read_link(&current).map_err(|err| PathSecurityError::Inspect {
            source: err,
            path: current.clone(),
        })?;

        // Relative link targets resolve against the link's own directory.
        let resolved = if target.is_absolute() {
            target
        } else {
            current
                .parent()
                .unwrap_or_else(|| Path::new("/"))
                .join(target)
        };

        let resolved = normalize_lexically(&resolved);
        debug!("symlink hop {} -> {}", current.display(), resolved.display());
        if resolved.strip_prefix(base).is_err() {
            return Err(PathSecurityError::SymlinkEscape {
                path: candidate.to_path_buf(),
                target: resolved,
            });
        }

        current = resolved;
    }

    Err(PathSecurityError::SymlinkDepthExceeded {
        path: candidate.to_path_buf(),
    })
}

/// Compare real paths of root and candidate.
///
/// A candidate that does not exist yet falls back to checking its parent
/// directory, since paths about to be created have no real path of their
/// own. If the parent does not exist either there is nothing to escape yet,
/// and the check is skipped.
fn check_real_path(base: &Path, candidate: &Path) -> Result<()> {
    let real_base = match fs::canonicalize(base) {
        Ok(path) => path,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(PathSecurityError::Inspect {
                source: err,
                path: base.to_path_buf(),
            })
        }
    };

    let real = match fs::canonicalize(candidate) {
        Ok(path) => path,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            match candidate.parent().map(fs::canonicalize) {
                Some(Ok(parent)) => parent,
                Some(Err(err)) if err.kind() == ErrorKind::NotFound => return Ok(()),
                Some(Err(err)) => {
                    return Err(PathSecurityError::Inspect {
                        source: err,
                        path: candidate.to_path_buf(),
                    })
                }
                None => return Ok(()),
            }
        }
        Err(err) => {
            return Err(PathSecurityError::Inspect {
                source: err,
                path: candidate.to_path_buf(),
            })
        }
    };

    if real.strip_prefix(&real_base).is_err() {
        return Err(PathSecurityError::EscapesRoot {
            path: candidate.to_string_lossy().into_owned(),
        });
    }

    Ok(())
}

/// Normalize path lexically without touching the file system.
///
/// Drops `.` segments and folds `..` segments into their parent. Never
/// escapes past the leading root component.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    normalized
}

/// Normalize relative path into its manifest key form.
///
/// Manifest documents key tracked files by relative path with forward
/// slashes on every platform, with no leading `./`.
pub fn normalize_path_key(relative_path: &str) -> String {
    let forward = relative_path.replace('\\', "/");
    let trimmed = forward.trim_start_matches("./").trim_matches('/');
    trimmed.to_string()
}

/// Determine absolute path to user's home directory.
///
/// Used as the installation root for global-scope installs. Does not check
/// if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf, NoWayHome> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Path sandboxing error types.
///
/// Any of these means the candidate path must not be touched. Treat as a
/// per-file skip, not a batch-fatal failure.
#[derive(Debug, thiserror::Error)]
pub enum PathSecurityError {
    /// Candidate path is empty.
    #[error("path is empty")]
    EmptyPath,

    /// Candidate path embeds a null byte.
    #[error("path {path:?} contains a null byte")]
    NullByte { path: String },

    /// Candidate path exceeds [`MAX_PATH_LENGTH`].
    #[error("path length {length} exceeds maximum of {MAX_PATH_LENGTH}")]
    PathTooLong { length: usize },

    /// Candidate path is absolute instead of relative.
    #[error("path {path:?} is absolute, expected path relative to installation root")]
    AbsolutePath { path: String },

    /// Candidate path contains a `..` segment.
    #[error("path {path:?} contains a parent directory traversal")]
    Traversal { path: String },

    /// Candidate path resolves outside the installation root.
    #[error("path {path:?} escapes the installation root")]
    EscapesRoot { path: String },

    /// Symlink chain hop resolves outside the installation root.
    #[error("symlink {} resolves to {} outside the installation root", path.display(), target.display())]
    SymlinkEscape { path: PathBuf, target: PathBuf },

    /// Symlink chain is deeper than [`MAX_SYMLINK_DEPTH`].
    #[error("symlink chain at {} exceeds depth limit of {MAX_SYMLINK_DEPTH}", path.display())]
    SymlinkDepthExceeded { path: PathBuf },

    /// Candidate path cannot be inspected at all.
    #[error("failed to inspect {}", path.display())]
    Inspect {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PathSecurityError> = std::result::Result<T, E>;
