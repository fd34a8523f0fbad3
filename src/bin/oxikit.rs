// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use oxikit::{
    checksum::{checksum_bytes, Ownership},
    diff::{apply_hunks, generate_hunks, load_file_content, FileHunk, DEFAULT_CONTEXT_LINES},
    kit::{scan_upstream, KitDefinition},
    manifest::{
        self, manifest_dir, read_manifest, remove_kit_from_manifest, track::FileTracker,
        write_manifest, Scope, TrackedFile,
    },
    path::{home_dir, validate},
    sync::{create_sync_plan, SyncPlan},
    uninstall::{analyze_installation, cleanup_empty_directories, ActionReason},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use std::{
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  oxikit [options] <oxikit-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        match self.command {
            Command::Install(opts) => run_install(opts).await,
            Command::Sync(opts) => run_sync(opts).await,
            Command::Uninstall(opts) => run_uninstall(opts).await,
            Command::Status(opts) => run_status(opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Install a kit from an extracted release tree.
    #[command(override_usage = "oxikit install [options] <upstream_dir>")]
    Install(InstallOptions),

    /// Update an installed kit from a newer extracted release tree.
    #[command(override_usage = "oxikit sync [options] <upstream_dir>")]
    Sync(SyncOptions),

    /// Remove one kit, or everything oxikit installed.
    #[command(override_usage = "oxikit uninstall [options] [<kit_name>]")]
    Uninstall(UninstallOptions),

    /// Show installed kits and per-file ownership counts.
    #[command(override_usage = "oxikit status [options]")]
    Status(StatusOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InstallOptions {
    /// Path to the extracted upstream release tree.
    #[arg(value_name = "upstream_dir")]
    pub upstream: PathBuf,

    /// Installation root; defaults to the current directory.
    #[arg(short, long, value_name = "path")]
    pub root: Option<String>,

    /// Install into the home directory instead of a project.
    #[arg(short, long)]
    pub global: bool,

    /// Show what would be installed without writing anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Overwrite existing files without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncOptions {
    /// Path to the extracted upstream release tree.
    #[arg(value_name = "upstream_dir")]
    pub upstream: PathBuf,

    /// Installation root; defaults to the current directory.
    #[arg(short, long, value_name = "path")]
    pub root: Option<String>,

    /// Sync the home-directory installation.
    #[arg(short, long)]
    pub global: bool,

    /// Show the sync plan without writing anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Accept every reviewed hunk without prompting.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UninstallOptions {
    /// Kit to remove; removes everything when omitted.
    #[arg(value_name = "kit_name")]
    pub kit: Option<String>,

    /// Installation root; defaults to the current directory.
    #[arg(short, long, value_name = "path")]
    pub root: Option<String>,

    /// Uninstall from the home directory instead of a project.
    #[arg(short, long)]
    pub global: bool,

    /// Delete user-modified kit files too.
    #[arg(short, long)]
    pub force: bool,

    /// Show the analysis without deleting anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StatusOptions {
    /// Installation root; defaults to the current directory.
    #[arg(short, long, value_name = "path")]
    pub root: Option<String>,

    /// Inspect the home-directory installation.
    #[arg(short, long)]
    pub global: bool,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer().compact();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry().with(layer).with(filter).init();

    if let Err(error) = Cli::parse().run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

/// Resolve the installation root from CLI flags.
fn resolve_root(root: Option<&str>, global: bool) -> Result<PathBuf> {
    match root {
        Some(raw) => {
            let expanded = shellexpand::full(raw).context("failed to expand root path")?;
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None if global => Ok(home_dir()?),
        None => std::env::current_dir().context("failed to determine current directory"),
    }
}

fn scope_for(global: bool) -> Scope {
    if global {
        Scope::Global
    } else {
        Scope::Local
    }
}

/// Progress bar wired to the batch tracker's callback.
fn tracking_bar(total: usize) -> Result<ProgressBar> {
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<30}  [{wide_bar:.yellow/blue}] {pos}/{len}",
    )?
    .progress_chars("-Cco.");
    let bar = ProgressBar::new(total as u64);
    bar.set_style(style);
    bar.set_message("checksumming files");
    Ok(bar)
}

/// Validate and write one file under the installation root.
async fn write_file_at(root: &Path, relative: &str, bytes: &[u8]) -> Result<()> {
    let target = validate(root, relative)?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&target, bytes)
        .await
        .with_context(|| format!("failed to write {}", target.display()))
}

async fn run_install(opts: InstallOptions) -> Result<()> {
    let root = resolve_root(opts.root.as_deref(), opts.global)?;
    let definition = KitDefinition::load(&opts.upstream).await?;
    let kit_id = definition.settings.name.clone();
    let version = definition.settings.version.clone();
    let files = scan_upstream(&opts.upstream, definition.settings.include.as_deref())?;

    if files.is_empty() {
        bail!("kit {kit_id:?} ships no installable files");
    }

    if opts.dry_run {
        println!("would install kit {kit_id} v{version} ({} files):", files.len());
        for file in &files {
            println!("  + {file}");
        }
        return Ok(());
    }

    let mut written = Vec::new();
    for relative in &files {
        let source = match validate(&opts.upstream, relative) {
            Ok(path) => path,
            Err(err) => {
                warn!("skipping {relative}: {err}");
                continue;
            }
        };
        let bytes = tokio::fs::read(&source)
            .await
            .with_context(|| format!("failed to read {}", source.display()))?;

        // An existing differing file belongs to somebody; ask before
        // clobbering it.
        if let Ok(target) = validate(&root, relative) {
            if let Ok(existing) = tokio::fs::read(&target).await {
                if checksum_bytes(&existing) != checksum_bytes(&bytes) && !opts.yes {
                    let overwrite = Confirm::new(&format!("{relative} exists and differs, overwrite?"))
                        .with_default(false)
                        .prompt()?;
                    if !overwrite {
                        info!("preserving existing {relative}");
                        continue;
                    }
                }
            }
        }

        write_file_at(&root, relative, &bytes).await?;
        written.push(relative.clone());
    }

    let bar = tracking_bar(written.len())?;
    let callback = {
        let bar = bar.clone();
        move |done: usize, _total: usize| bar.set_position(done as u64)
    };

    let mut tracker = FileTracker::new();
    let report = tracker
        .track_files(
            &root,
            &written,
            &version,
            manifest::track::DEFAULT_CONCURRENCY,
            Some(&callback),
        )
        .await;
    bar.finish_and_clear();

    if report.failed > 0 {
        warn!("{} file(s) could not be tracked and were excluded", report.failed);
    }

    write_manifest(&root, &kit_id, &version, scope_for(opts.global), tracker.into_files())
        .await?;
    println!("installed kit {kit_id} v{version} ({} files)", report.success);

    Ok(())
}

async fn run_sync(opts: SyncOptions) -> Result<()> {
    let root = resolve_root(opts.root.as_deref(), opts.global)?;
    let definition = KitDefinition::load(&opts.upstream).await?;
    let kit_id = definition.settings.name.clone();
    let version = definition.settings.version.clone();

    let Some(document) = read_manifest(&root).await else {
        bail!("no oxikit manifest under {}, run install first", root.display());
    };
    if !document.kits.contains_key(&kit_id) {
        bail!("kit {kit_id:?} is not installed here, run install first");
    }

    // Files new in this release have no tracked record yet. A missing
    // local copy is a safe creation; an existing untracked local copy
    // belongs to the user and is left alone.
    let mut tracked: Vec<TrackedFile> = document.kit_files(&kit_id).to_vec();
    let shipped = scan_upstream(&opts.upstream, definition.settings.include.as_deref())?;
    let mut fresh = Vec::new();
    {
        let known: std::collections::BTreeSet<&str> =
            tracked.iter().map(|file| file.path.as_str()).collect();
        for path in &shipped {
            if known.contains(path.as_str()) {
                continue;
            }
            let local_exists = match validate(&root, path) {
                Ok(local) => tokio::fs::symlink_metadata(&local).await.is_ok(),
                Err(_) => true,
            };
            let ownership = if local_exists {
                warn!("{path} ships with this release but an untracked local copy exists, leaving it alone");
                Ownership::User
            } else {
                Ownership::Kit
            };
            fresh.push(TrackedFile {
                path: path.clone(),
                checksum: String::new(),
                base_checksum: None,
                ownership,
                installed_version: version.clone(),
            });
        }
    }
    tracked.extend(fresh);

    let plan = create_sync_plan(&tracked, &root, &opts.upstream).await;

    if opts.dry_run {
        render_plan(&kit_id, &version, &plan);
        return Ok(());
    }

    let mut tracker = FileTracker::new();

    // Pristine and newly created files take the upstream version as is.
    for file in &plan.auto_update {
        let source = validate(&opts.upstream, &file.path)?;
        let bytes = tokio::fs::read(&source)
            .await
            .with_context(|| format!("failed to read {}", source.display()))?;
        write_file_at(&root, &file.path, &bytes).await?;
        tracker.track_file(&root, &file.path, &version)?;
    }

    // Edited files go through per-hunk review; the recorded checksum stays
    // the pristine upstream hash so later syncs keep flagging local edits.
    for file in &plan.needs_review {
        let local_path = validate(&root, &file.path)?;
        let upstream_path = validate(&opts.upstream, &file.path)?;
        let current = load_file_content(&local_path).await?;
        let incoming = load_file_content(&upstream_path).await?;

        let hunks = generate_hunks(&current, &incoming, &file.path, DEFAULT_CONTEXT_LINES);
        if hunks.is_empty() {
            // The user's edits already match this release; that makes the
            // file pristine again.
            let pristine = checksum_bytes(incoming.as_bytes());
            tracker.insert(TrackedFile {
                path: file.path.clone(),
                checksum: pristine.clone(),
                base_checksum: Some(pristine),
                ownership: Ownership::Kit,
                installed_version: version.clone(),
            });
            continue;
        }

        let accepted = review_hunks(&file.path, &hunks, opts.yes)?;
        if accepted.iter().any(|flag| *flag) {
            let outcome = apply_hunks(&current, &hunks, &accepted)?;
            if outcome.skipped > 0 {
                warn!("{}: {} hunk(s) no longer fit and were skipped", file.path, outcome.skipped);
            }
            write_file_at(&root, &file.path, outcome.content.as_bytes()).await?;
        } else {
            info!("keeping {} as is, no hunks accepted", file.path);
        }

        let pristine = checksum_bytes(incoming.as_bytes());
        tracker.insert(TrackedFile {
            path: file.path.clone(),
            checksum: pristine.clone(),
            base_checksum: Some(pristine),
            ownership: Ownership::KitModified,
            installed_version: version.clone(),
        });
    }

    // Skipped files keep their previous records untouched.
    for file in &plan.skipped {
        if !file.checksum.is_empty() || file.ownership == Ownership::User {
            tracker.insert(file.clone());
        }
    }

    write_manifest(&root, &kit_id, &version, scope_for(opts.global), tracker.into_files())
        .await?;
    println!(
        "synced kit {kit_id} to v{version}: {} updated, {} reviewed, {} skipped",
        plan.auto_update.len(),
        plan.needs_review.len(),
        plan.skipped.len()
    );

    Ok(())
}

/// Render a sync plan without touching anything.
fn render_plan(kit_id: &str, version: &str, plan: &SyncPlan) {
    println!("sync plan for kit {kit_id} -> v{version}:");
    for file in &plan.auto_update {
        println!("  update   {}", file.path);
    }
    for file in &plan.needs_review {
        println!("  review   {}", file.path);
    }
    for file in &plan.skipped {
        println!("  skip     {} ({})", file.path, file.ownership);
    }
}

/// Prompt per hunk, or accept everything with `--yes`.
fn review_hunks(label: &str, hunks: &[FileHunk], accept_all: bool) -> Result<Vec<bool>> {
    if accept_all {
        return Ok(vec![true; hunks.len()]);
    }

    let mut accepted = Vec::with_capacity(hunks.len());
    for (index, hunk) in hunks.iter().enumerate() {
        println!("\n{label} {}", hunk.header());
        for line in &hunk.lines {
            print!("{line}");
            if !line.ends_with('\n') {
                println!();
            }
        }

        let take = Confirm::new(&format!("apply hunk {}/{}?", index + 1, hunks.len()))
            .with_default(true)
            .prompt()?;
        accepted.push(take);
    }

    Ok(accepted)
}

async fn run_uninstall(opts: UninstallOptions) -> Result<()> {
    let root = resolve_root(opts.root.as_deref(), opts.global)?;
    let analysis = analyze_installation(&root, opts.kit.as_deref(), opts.force).await;

    println!("to delete:");
    for action in &analysis.to_delete {
        println!("  - {} ({})", action.path, action.reason);
    }
    println!("to preserve:");
    for action in &analysis.to_preserve {
        println!("  = {} ({})", action.path, action.reason);
    }

    if opts.dry_run {
        return Ok(());
    }

    if analysis.to_delete.is_empty() {
        println!("nothing to delete");
        return Ok(());
    }

    if !opts.yes {
        let proceed = Confirm::new(&format!("delete {} item(s)?", analysis.to_delete.len()))
            .with_default(false)
            .prompt()?;
        if !proceed {
            return Ok(());
        }
    }

    let manifest_rel = format!("{}/{}", manifest::MANIFEST_DIR, manifest::MANIFEST_FILE);
    for action in &analysis.to_delete {
        // The manifest document is handled last, after every file delete.
        if action.path == manifest_rel {
            continue;
        }

        let target = match validate(&root, &action.path) {
            Ok(path) => path,
            Err(err) => {
                warn!("refusing to delete {}: {err}", action.path);
                continue;
            }
        };

        let result = match action.reason {
            ActionReason::LegacyDirectory => tokio::fs::remove_dir_all(&target).await,
            _ => tokio::fs::remove_file(&target).await,
        };
        match result {
            Ok(()) => {
                cleanup_empty_directories(&target, &root).await;
            }
            Err(err) => warn!("failed to delete {}: {err}", action.path),
        }
    }

    if analysis.remaining_kits.is_empty() {
        let state_dir = manifest_dir(&root);
        if let Err(err) = tokio::fs::remove_dir_all(&state_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove {}: {err}", state_dir.display());
            }
        }
        println!("removed all kits");
    } else if let Some(kit_id) = &opts.kit {
        remove_kit_from_manifest(&root, kit_id).await?;
        println!(
            "removed kit {kit_id}, {} kit(s) remain",
            analysis.remaining_kits.len()
        );
    }

    Ok(())
}

async fn run_status(opts: StatusOptions) -> Result<()> {
    let root = resolve_root(opts.root.as_deref(), opts.global)?;
    let Some(document) = read_manifest(&root).await else {
        println!("no kits installed under {}", root.display());
        return Ok(());
    };

    println!("scope: {}", document.scope);
    for (kit_id, kit) in &document.kits {
        let files = kit.files.as_deref().unwrap_or_default();
        let pristine = files.iter().filter(|file| file.ownership == Ownership::Kit).count();
        let modified = files
            .iter()
            .filter(|file| file.ownership == Ownership::KitModified)
            .count();
        let user = files.iter().filter(|file| file.ownership == Ownership::User).count();

        println!(
            "{kit_id} v{} (installed {}): {} files ({pristine} pristine, {modified} modified, {user} user)",
            kit.version,
            kit.installed_at.format("%Y-%m-%d"),
            files.len()
        );
    }

    Ok(())
}
