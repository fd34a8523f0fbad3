// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Ownership-aware kit installation and synchronization.
//!
//! Oxikit installs, updates, and removes __kits__: named, versioned bundles
//! of text artifacts (command templates, agent instructions, rule files,
//! skills) placed into a project directory or the user's home directory.
//!
//! Copying files is the easy part. The hard part is knowing, for every
//! file, whether it is still exactly what oxikit last installed, whether
//! the user has edited it, or whether the user created it independently,
//! and then reconciling a new upstream release against that history without
//! destroying anyone's work. Oxikit answers that with a per-file ownership
//! record persisted in a manifest document: a content checksum taken at
//! install time, a baseline checksum from the last sync, and an ownership
//! classification derived from comparing them.
//!
//! Two contracts hold everywhere:
//!
//! - __Never silently destroy user data.__ Pristine kit files update
//!   freely; anything the user touched needs review or force, and anything
//!   the user created is off limits entirely.
//! - __Never write outside the installation root.__ Every relative path is
//!   validated against traversal and symlink escapes before any read,
//!   write, or delete.
//!
//! # Module Map
//!
//! - [`path`]: sandbox validation of relative paths, symlink chains
//!   included.
//! - [`checksum`]: content hashing and the ownership classification built
//!   on it.
//! - [`diff`]: hunk generation and accept/reject application for reviewed
//!   merges.
//! - [`kit`]: the `kit.toml` definition file and upstream tree scanning.
//! - [`manifest`]: the persisted multi-kit manifest, its lock, and the
//!   batch file tracker.
//! - [`sync`]: partitioning a kit's files into auto-update, needs-review,
//!   and skipped.
//! - [`uninstall`]: delete/preserve classification and empty-directory
//!   cleanup.

pub mod checksum;
pub mod diff;
pub mod kit;
pub mod manifest;
pub mod path;
pub mod sync;
pub mod uninstall;

pub use checksum::Ownership;
pub use diff::FileHunk;
pub use kit::KitDefinition;
pub use manifest::{KitMetadata, Metadata, Scope, TrackedFile};
pub use sync::SyncPlan;
pub use uninstall::UninstallAnalysis;
