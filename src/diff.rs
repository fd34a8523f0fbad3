// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Line-based diffing and hunk application.
//!
//! When a sync flags a file as needing review, the user decides hunk by hunk
//! which upstream changes to take. This module produces those hunks from the
//! local and upstream contents, and applies the accepted subset back onto
//! the local content.
//!
//! # Hunk Representation
//!
//! A [`FileHunk`] is the usual unified-diff shape: 1-based start lines and
//! line counts for both sides, plus the literal lines prefixed with `+`,
//! `-`, or a space. Line bodies keep their original terminators, so
//! applying hunks is pure concatenation of verbatim slices and reproduces
//! the target content byte for byte.
//!
//! # Application Strategy
//!
//! [`apply_hunks`] first applies the accepted hunks strictly: every context
//! and deletion line must match the current content exactly. If the content
//! has drifted since the hunks were generated, it falls back to a
//! line-number splice that bounds-checks each hunk and skips the ones that
//! no longer fit, rather than failing the whole file. Only when not a
//! single accepted hunk can be applied does the whole operation fail.
//! Returning the original content unchanged while claiming success is not
//! an option here; that would disguise data loss as a completed merge.
//!
//! # Binary and Oversize Content
//!
//! Hunk review only makes sense for text. [`load_file_content`] refuses
//! symlinks, enforces a size ceiling before buffering, and rejects content
//! that fails a null-byte or UTF-8 check. [`is_binary_file`] provides the
//! quick heuristic used on already-loaded bytes.

use similar::{ChangeTag, TextDiff};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Context lines included around changes when generating hunks.
pub const DEFAULT_CONTEXT_LINES: usize = 3;

/// Size ceiling for [`load_file_content`], in bytes.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Bytes sampled from the head of content by [`is_binary_file`].
const BINARY_SAMPLE_SIZE: usize = 8 * 1024;

/// Fraction of non-printable bytes past which content counts as binary.
const BINARY_THRESHOLD: f64 = 0.10;

/// One contiguous block of line differences with surrounding context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHunk {
    /// 1-based first line of the hunk on the old side.
    pub old_start: usize,

    /// Number of old-side lines covered by the hunk.
    pub old_lines: usize,

    /// 1-based first line of the hunk on the new side.
    pub new_start: usize,

    /// Number of new-side lines covered by the hunk.
    pub new_lines: usize,

    /// Literal hunk lines, each prefixed with `+`, `-`, or a space. Line
    /// bodies keep their original terminators.
    pub lines: Vec<String>,
}

impl FileHunk {
    /// Render the unified-diff range header for this hunk.
    #[must_use]
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_lines, self.new_start, self.new_lines
        )
    }
}

/// Outcome of applying an accepted subset of hunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkApplyOutcome {
    /// The merged content.
    pub content: String,

    /// Number of hunks actually applied.
    pub applied: usize,

    /// Number of accepted hunks skipped because they no longer fit.
    pub skipped: usize,
}

/// Generate line-based hunks between two versions of a file.
///
/// `label` names the file in logs only; it does not affect the hunks.
/// Identical inputs yield an empty hunk list.
#[must_use]
pub fn generate_hunks(
    current: &str,
    incoming: &str,
    label: &str,
    context_lines: usize,
) -> Vec<FileHunk> {
    let diff = TextDiff::from_lines(current, incoming);
    let mut hunks = Vec::new();

    for group in diff.grouped_ops(context_lines) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };

        let old_start = first.old_range().start;
        let new_start = first.new_range().start;
        let old_lines = last.old_range().end - old_start;
        let new_lines = last.new_range().end - new_start;

        let mut lines = Vec::new();
        for op in &group {
            for change in diff.iter_changes(op) {
                let prefix = match change.tag() {
                    ChangeTag::Delete => '-',
                    ChangeTag::Insert => '+',
                    ChangeTag::Equal => ' ',
                };
                lines.push(format!("{prefix}{}", change.value()));
            }
        }

        hunks.push(FileHunk {
            old_start: old_start + 1,
            old_lines,
            new_start: new_start + 1,
            new_lines,
            lines,
        });
    }

    debug!("generated {} hunk(s) for {label}", hunks.len());
    hunks
}

/// Apply an accepted subset of hunks onto content.
///
/// `accepted` is indexed parallel to `hunks`; hunks past the end of the
/// flag list are treated as rejected. With nothing accepted the content is
/// returned unchanged. Hunks that fail the strict pass and no longer fit
/// the content in the fallback pass are skipped with a warning, and the
/// skip count is reported in the outcome.
///
/// # Errors
///
/// - Return [`DiffError::ApplyFailed`] if hunks were accepted but not a
///   single one could be applied.
pub fn apply_hunks(
    content: &str,
    hunks: &[FileHunk],
    accepted: &[bool],
) -> Result<HunkApplyOutcome> {
    let accepted_hunks: Vec<&FileHunk> = hunks
        .iter()
        .enumerate()
        .filter(|(index, _)| accepted.get(*index).copied().unwrap_or(false))
        .map(|(_, hunk)| hunk)
        .collect();

    if accepted_hunks.is_empty() {
        return Ok(HunkApplyOutcome {
            content: content.to_string(),
            applied: 0,
            skipped: 0,
        });
    }

    match apply_strict(content, &accepted_hunks) {
        Ok(merged) => Ok(HunkApplyOutcome {
            content: merged,
            applied: accepted_hunks.len(),
            skipped: 0,
        }),
        Err(mismatch) => {
            warn!("strict hunk application failed ({mismatch}), retrying by line numbers");
            apply_manual(content, &accepted_hunks)
        }
    }
}

/// Strict pass: every context and deletion line must match the content.
fn apply_strict(content: &str, hunks: &[&FileHunk]) -> Result<String, String> {
    let content_lines: Vec<&str> = content.split_inclusive('\n').collect();
    let mut ordered: Vec<&FileHunk> = hunks.to_vec();
    ordered.sort_by_key(|hunk| hunk.old_start);

    let mut merged = String::new();
    let mut cursor = 0usize;

    for hunk in ordered {
        let start = hunk.old_start.saturating_sub(1);
        if start < cursor || start > content_lines.len() {
            return Err(format!("hunk {} out of order or out of range", hunk.header()));
        }

        merged.extend(content_lines[cursor..start].iter().copied());
        cursor = start;

        for line in &hunk.lines {
            let Some(prefix) = line.chars().next() else {
                continue;
            };
            let body = &line[prefix.len_utf8()..];

            match prefix {
                ' ' | '-' => {
                    let actual = content_lines.get(cursor).copied().unwrap_or_default();
                    if actual != body && actual.trim_end_matches(['\r', '\n']) != body.trim_end_matches(['\r', '\n']) {
                        return Err(format!(
                            "context drift at line {} of hunk {}",
                            cursor + 1,
                            hunk.header()
                        ));
                    }
                    if prefix == ' ' {
                        merged.push_str(actual);
                    }
                    cursor += 1;
                }
                '+' => merged.push_str(body),
                _ => return Err(format!("malformed hunk line {line:?}")),
            }
        }
    }

    merged.extend(content_lines[cursor..].iter().copied());
    Ok(merged)
}

/// Fallback pass: splice hunks by recorded line numbers.
///
/// Hunks are applied in descending `old_start` order so earlier hunks'
/// line numbers are unaffected by later splices. Hunks whose range no
/// longer fits the content are skipped, not fatal.
fn apply_manual(content: &str, hunks: &[&FileHunk]) -> Result<HunkApplyOutcome> {
    let mut lines: Vec<String> = content
        .split_inclusive('\n')
        .map(str::to_string)
        .collect();

    let mut ordered: Vec<&FileHunk> = hunks.to_vec();
    ordered.sort_by(|a, b| b.old_start.cmp(&a.old_start));

    let mut applied = 0usize;
    let mut skipped = 0usize;

    for hunk in ordered {
        let mut delete_count = 0usize;
        let mut replacement = Vec::new();

        for line in &hunk.lines {
            let Some(prefix) = line.chars().next() else {
                // Malformed empty entry, nothing to do with it.
                continue;
            };
            let body = &line[prefix.len_utf8()..];

            match prefix {
                ' ' => {
                    delete_count += 1;
                    replacement.push(body.to_string());
                }
                '-' => delete_count += 1,
                '+' => replacement.push(body.to_string()),
                _ => {
                    warn!("skipping malformed hunk line {line:?}");
                }
            }
        }

        let start = hunk.old_start.saturating_sub(1);
        if start > lines.len() || start + delete_count > lines.len() {
            warn!(
                "skipping hunk {}: range no longer fits content of {} line(s)",
                hunk.header(),
                lines.len()
            );
            skipped += 1;
            continue;
        }

        lines.splice(start..start + delete_count, replacement);
        applied += 1;
    }

    if applied == 0 {
        return Err(DiffError::ApplyFailed { failed: skipped });
    }

    Ok(HunkApplyOutcome {
        content: lines.concat(),
        applied,
        skipped,
    })
}

/// Heuristic binary check over at most the first 8 KB of content.
///
/// Any null byte means binary immediately. Otherwise content is binary if
/// more than 10% of the sample is non-printable (tab, LF, and CR do not
/// count). Empty content is never binary.
#[must_use]
pub fn is_binary_file(content: &[u8]) -> bool {
    if content.is_empty() {
        return false;
    }

    let sample = &content[..content.len().min(BINARY_SAMPLE_SIZE)];
    let mut non_printable = 0usize;

    for &byte in sample {
        if byte == 0 {
            return true;
        }
        if byte < 0x20 && byte != b'\t' && byte != b'\n' && byte != b'\r' {
            non_printable += 1;
        }
    }

    (non_printable as f64) / (sample.len() as f64) > BINARY_THRESHOLD
}

/// Load a file's text content safely for diffing.
///
/// Uses a symlink-aware stat that does not follow links, so link status and
/// size come from one atomic inspection: symlinks are rejected outright and
/// the size ceiling is enforced before any bytes are buffered. After
/// reading, the raw bytes get a null-byte and UTF-8 check in case the
/// binary heuristic on decoded text would have missed it.
///
/// # Errors
///
/// - Return [`DiffError::FileIsSymlink`] for symlinks.
/// - Return [`DiffError::FileTooLarge`] past [`MAX_FILE_SIZE`].
/// - Return [`DiffError::BinaryContent`] on a raw null byte.
/// - Return [`DiffError::InvalidEncoding`] on invalid UTF-8.
/// - Return [`DiffError::Read`] if the file cannot be read at all.
pub async fn load_file_content(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let meta = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|err| DiffError::Read {
            source: err,
            path: path.to_path_buf(),
        })?;

    if meta.file_type().is_symlink() {
        return Err(DiffError::FileIsSymlink {
            path: path.to_path_buf(),
        });
    }

    if meta.len() > MAX_FILE_SIZE {
        return Err(DiffError::FileTooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
        });
    }

    let bytes = tokio::fs::read(path).await.map_err(|err| DiffError::Read {
        source: err,
        path: path.to_path_buf(),
    })?;

    if bytes.contains(&0) {
        return Err(DiffError::BinaryContent {
            path: path.to_path_buf(),
        });
    }

    String::from_utf8(bytes).map_err(|_| DiffError::InvalidEncoding {
        path: path.to_path_buf(),
    })
}

/// Diff generation and application error types.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// Neither strict nor line-number application could place any hunk.
    #[error("failed to apply {failed} accepted hunk(s), content left untouched")]
    ApplyFailed { failed: usize },

    /// Refusing to read content through a symlink.
    #[error("{} is a symlink, refusing to read through it", path.display())]
    FileIsSymlink { path: PathBuf },

    /// File exceeds [`MAX_FILE_SIZE`].
    #[error("{} is {size} bytes, over the {MAX_FILE_SIZE} byte limit", path.display())]
    FileTooLarge { path: PathBuf, size: u64 },

    /// Raw content contains null bytes.
    #[error("{} contains binary content", path.display())]
    BinaryContent { path: PathBuf },

    /// Raw content is not valid UTF-8.
    #[error("{} is not valid UTF-8", path.display())]
    InvalidEncoding { path: PathBuf },

    /// File cannot be read.
    #[error("failed to read {}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = DiffError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const OLD: &str = indoc! {"
        # Review command

        Step one: read the diff.
        Step two: take notes.
        Step three: write feedback.
    "};

    const NEW: &str = indoc! {"
        # Review command

        Step one: read the diff twice.
        Step two: take notes.
        Step three: write feedback.
        Step four: follow up.
    "};

    #[test]
    fn generate_hunks_identical_inputs() {
        assert!(generate_hunks(OLD, OLD, "review.md", DEFAULT_CONTEXT_LINES).is_empty());
    }

    #[test]
    fn generate_hunks_records_ranges() {
        let hunks = generate_hunks(OLD, NEW, "review.md", DEFAULT_CONTEXT_LINES);
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].old_start, 1);
        assert_eq!(hunks[0].old_lines, 5);
        assert_eq!(hunks[0].new_lines, 6);
        assert!(hunks[0].lines.iter().any(|line| line.starts_with('+')));
        assert!(hunks[0].lines.iter().any(|line| line.starts_with('-')));
    }

    #[test]
    fn apply_hunks_nothing_accepted_returns_content_unchanged() -> anyhow::Result<()> {
        let hunks = generate_hunks(OLD, NEW, "review.md", DEFAULT_CONTEXT_LINES);
        let outcome = apply_hunks(OLD, &hunks, &vec![false; hunks.len()])?;
        assert_eq!(outcome.content, OLD);
        assert_eq!(outcome.applied, 0);
        Ok(())
    }

    #[test]
    fn apply_hunks_round_trip_reproduces_target() -> anyhow::Result<()> {
        let hunks = generate_hunks(OLD, NEW, "review.md", DEFAULT_CONTEXT_LINES);
        let outcome = apply_hunks(OLD, &hunks, &vec![true; hunks.len()])?;
        assert_eq!(outcome.content, NEW);
        Ok(())
    }

    #[test]
    fn apply_hunks_round_trip_without_trailing_newline() -> anyhow::Result<()> {
        let old = "alpha\nbeta\ngamma";
        let new = "alpha\nBETA\ngamma\ndelta";
        let hunks = generate_hunks(old, new, "x.md", DEFAULT_CONTEXT_LINES);
        let outcome = apply_hunks(old, &hunks, &vec![true; hunks.len()])?;
        assert_eq!(outcome.content, new);
        Ok(())
    }

    #[test]
    fn apply_hunks_round_trip_multiple_hunks() -> anyhow::Result<()> {
        let old: String = (1..=40).map(|n| format!("line {n}\n")).collect();
        let new = old
            .replace("line 3\n", "line three\n")
            .replace("line 35\n", "line thirty-five\nline extra\n");

        let hunks = generate_hunks(&old, &new, "big.md", DEFAULT_CONTEXT_LINES);
        assert_eq!(hunks.len(), 2);

        let outcome = apply_hunks(&old, &hunks, &[true, true])?;
        assert_eq!(outcome.content, new);
        Ok(())
    }

    #[test]
    fn apply_hunks_partial_accept() -> anyhow::Result<()> {
        let old: String = (1..=40).map(|n| format!("line {n}\n")).collect();
        let new = old
            .replace("line 3\n", "line three\n")
            .replace("line 35\n", "line thirty-five\n");

        let hunks = generate_hunks(&old, &new, "big.md", DEFAULT_CONTEXT_LINES);
        let outcome = apply_hunks(&old, &hunks, &[true, false])?;

        assert!(outcome.content.contains("line three"));
        assert!(outcome.content.contains("line 35"));
        Ok(())
    }

    #[test]
    fn apply_hunks_drifted_context_falls_back_to_line_numbers() -> anyhow::Result<()> {
        let hunks = generate_hunks(OLD, NEW, "review.md", DEFAULT_CONTEXT_LINES);

        // The user reworded a context line after hunk generation.
        let drifted = OLD.replace("take notes", "take careful notes");
        let outcome = apply_hunks(&drifted, &hunks, &vec![true; hunks.len()])?;

        assert_eq!(outcome.applied, 1);
        assert!(outcome.content.contains("read the diff twice"));
        Ok(())
    }

    #[test]
    fn apply_hunks_out_of_range_hunks_fail_hard_when_nothing_applies() {
        let hunk = FileHunk {
            old_start: 500,
            old_lines: 2,
            new_start: 500,
            new_lines: 2,
            lines: vec![" context\n".into(), "-gone\n".into(), "+here\n".into()],
        };

        let result = apply_hunks("only\ntwo lines\n", &[hunk], &[true]);
        assert!(matches!(result, Err(DiffError::ApplyFailed { failed: 1 })));
    }

    #[test]
    fn apply_hunks_skips_unfitting_hunk_but_applies_rest() -> anyhow::Result<()> {
        let old: String = (1..=40).map(|n| format!("line {n}\n")).collect();
        let new = old
            .replace("line 3\n", "line three\n")
            .replace("line 35\n", "line thirty-five\n");
        let hunks = generate_hunks(&old, &new, "big.md", DEFAULT_CONTEXT_LINES);

        // Content truncated since generation: the second hunk no longer fits.
        let truncated: String = (1..=20).map(|n| format!("line {n}\n")).collect();
        let outcome = apply_hunks(&truncated, &hunks, &[true, true])?;

        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.skipped, 1);
        assert!(outcome.content.contains("line three"));
        Ok(())
    }

    #[test]
    fn is_binary_file_empty_and_plain_text() {
        assert!(!is_binary_file(b""));
        assert!(!is_binary_file(b"plain text\twith tabs\nand newlines\r\n"));
    }

    #[test]
    fn is_binary_file_null_byte() {
        assert!(is_binary_file(b"almost text\0"));
    }

    #[test]
    fn is_binary_file_mostly_control_bytes() {
        let noisy: Vec<u8> = (0..100u8).map(|n| if n % 2 == 0 { 0x01 } else { b'a' }).collect();
        assert!(is_binary_file(&noisy));
    }

    #[tokio::test]
    async fn load_file_content_reads_text() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("a.md");
        tokio::fs::write(&path, "text content\n").await?;

        assert_eq!(load_file_content(&path).await?, "text content\n");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn load_file_content_rejects_symlink() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let target = temp.path().join("real.md");
        tokio::fs::write(&target, "content").await?;
        std::os::unix::fs::symlink(&target, temp.path().join("link.md"))?;

        let result = load_file_content(temp.path().join("link.md")).await;
        assert!(matches!(result, Err(DiffError::FileIsSymlink { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn load_file_content_rejects_null_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("blob.bin");
        tokio::fs::write(&path, b"data\0data").await?;

        let result = load_file_content(&path).await;
        assert!(matches!(result, Err(DiffError::BinaryContent { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn load_file_content_rejects_invalid_utf8() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("latin1.md");
        tokio::fs::write(&path, [0xC3, 0x28, b'x']).await?;

        let result = load_file_content(&path).await;
        assert!(matches!(result, Err(DiffError::InvalidEncoding { .. })));
        Ok(())
    }
}
