// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::KitFixture;

use anyhow::Result;
use indoc::indoc;
use oxikit::{
    checksum::checksum_bytes,
    diff::{apply_hunks, generate_hunks, DEFAULT_CONTEXT_LINES},
    manifest::{manifest_path, read_manifest, write_manifest, Scope, TrackedFile},
    sync::create_sync_plan,
    uninstall::{analyze_installation, ActionReason},
    Ownership,
};
use pretty_assertions::assert_eq;

const A_V1: &str = "# a\n\nstep one\nstep two\n";
const A_V2: &str = "# a\n\nstep one, refined\nstep two\n";
const B_V1: &str = indoc! {"
    # b

    rule one
    rule two
    rule three
"};
const B_V2: &str = indoc! {"
    # b

    rule one
    rule two, expanded
    rule three
    rule four
"};

#[tokio::test]
async fn update_flow_partitions_and_merges() -> Result<()> {
    let fixture = KitFixture::new()?;
    fixture
        .install("engineer", "1.0.0", &[("a.md", A_V1), ("b.md", B_V1)])
        .await?;

    // The user appends a note to b.md, then upstream ships v1.1.0.
    let b_edited = format!("{B_V1}\nmy own note\n");
    fixture.write_root("b.md", &b_edited)?;
    fixture.write_upstream("a.md", A_V2)?;
    fixture.write_upstream("b.md", B_V2)?;

    let document = read_manifest(fixture.root()).await.expect("manifest exists");
    let tracked = document.kit_files("engineer").to_vec();
    let plan = create_sync_plan(&tracked, fixture.root(), fixture.upstream()).await;

    let auto: Vec<&str> = plan.auto_update.iter().map(|f| f.path.as_str()).collect();
    let review: Vec<&str> = plan.needs_review.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(auto, vec!["a.md"]);
    assert_eq!(review, vec!["b.md"]);
    assert!(plan.skipped.is_empty());

    // Accepting every hunk converges the file onto the upstream version.
    let hunks = generate_hunks(&b_edited, B_V2, "b.md", DEFAULT_CONTEXT_LINES);
    assert!(!hunks.is_empty());
    let merged = apply_hunks(&b_edited, &hunks, &vec![true; hunks.len()])?;
    assert_eq!(merged.content, B_V2);

    // Rejecting every hunk leaves the user's copy alone.
    let untouched = apply_hunks(&b_edited, &hunks, &vec![false; hunks.len()])?;
    assert_eq!(untouched.content, b_edited);

    Ok(())
}

#[tokio::test]
async fn sync_plan_is_stable_across_runs() -> Result<()> {
    let fixture = KitFixture::new()?;
    fixture
        .install("engineer", "1.0.0", &[("a.md", A_V1), ("b.md", B_V1)])
        .await?;
    fixture.write_root("b.md", "edited\n")?;
    fixture.write_upstream("a.md", A_V2)?;

    let document = read_manifest(fixture.root()).await.expect("manifest exists");
    let tracked = document.kit_files("engineer").to_vec();

    let first = create_sync_plan(&tracked, fixture.root(), fixture.upstream()).await;
    let second = create_sync_plan(&tracked, fixture.root(), fixture.upstream()).await;
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn uninstall_preserves_files_shared_between_kits() -> Result<()> {
    let fixture = KitFixture::new()?;
    fixture
        .install(
            "engineer",
            "1.0.0",
            &[("a.md", A_V1), ("shared.md", "shared content\n")],
        )
        .await?;
    fixture
        .install("marketing", "1.0.0", &[("shared.md", "shared content\n")])
        .await?;

    let analysis = analyze_installation(fixture.root(), Some("engineer"), false).await;

    let shared = analysis
        .to_preserve
        .iter()
        .find(|action| action.path == "shared.md")
        .expect("shared.md should be preserved");
    assert_eq!(shared.reason, ActionReason::SharedWithOtherKit);
    assert!(!analysis.to_delete.iter().any(|a| a.path == "shared.md"));

    let exclusive = analysis
        .to_delete
        .iter()
        .find(|action| action.path == "a.md")
        .expect("a.md should be deleted");
    assert_eq!(exclusive.reason, ActionReason::Pristine);
    assert_eq!(analysis.remaining_kits, vec!["marketing".to_string()]);
    Ok(())
}

#[tokio::test]
async fn force_overwrite_deletes_user_modified_files() -> Result<()> {
    let fixture = KitFixture::new()?;
    fixture
        .install("engineer", "1.0.0", &[("c.md", "original\n")])
        .await?;
    fixture.write_root("c.md", "original, edited by hand\n")?;

    let gentle = analyze_installation(fixture.root(), Some("engineer"), false).await;
    assert_eq!(
        gentle
            .to_preserve
            .iter()
            .find(|a| a.path == "c.md")
            .expect("preserved without force")
            .reason,
        ActionReason::UserModified
    );

    let forced = analyze_installation(fixture.root(), Some("engineer"), true).await;
    assert_eq!(
        forced
            .to_delete
            .iter()
            .find(|a| a.path == "c.md")
            .expect("deleted with force")
            .reason,
        ActionReason::ForceOverwrite
    );
    Ok(())
}

#[tokio::test]
async fn legacy_manifest_survives_a_new_install() -> Result<()> {
    let fixture = KitFixture::new()?;

    // A pre-multi-kit document left behind by an old version of the tool.
    std::fs::create_dir_all(fixture.root().join(".oxikit"))?;
    let legacy = indoc! {r#"
        {
          "name": "starter",
          "version": "0.5.0",
          "installedAt": "2024-06-01T00:00:00Z",
          "files": [
            {
              "path": "rules/base.md",
              "checksum": "cafe",
              "ownership": "kit",
              "installedVersion": "0.5.0"
            }
          ]
        }
    "#};
    std::fs::write(manifest_path(fixture.root()), legacy)?;

    fixture
        .install("engineer", "1.0.0", &[("a.md", A_V1)])
        .await?;

    let document = read_manifest(fixture.root()).await.expect("manifest exists");
    assert_eq!(document.kits.len(), 2);
    assert_eq!(document.kits["starter"].version, "0.5.0");
    assert_eq!(document.kit_files("starter")[0].path, "rules/base.md");
    assert_eq!(document.kits["engineer"].version, "1.0.0");

    // The migrated document must not regain legacy top-level file lists.
    let raw = std::fs::read_to_string(manifest_path(fixture.root()))?;
    assert!(raw.contains("\"kits\""));
    assert!(!raw.contains("installedFiles"));
    Ok(())
}

#[tokio::test]
async fn concurrent_writes_serialize_under_the_lock() -> Result<()> {
    let fixture = KitFixture::new()?;

    let record = |path: &str| TrackedFile {
        path: path.to_string(),
        checksum: checksum_bytes(b"content"),
        base_checksum: Some(checksum_bytes(b"content")),
        ownership: Ownership::Kit,
        installed_version: "1.0.0".to_string(),
    };

    let first = write_manifest(
        fixture.root(),
        "engineer",
        "1.0.0",
        Scope::Local,
        vec![record("a.md")],
    );
    let second = write_manifest(
        fixture.root(),
        "marketing",
        "1.0.0",
        Scope::Local,
        vec![record("b.md")],
    );

    let (first, second) = tokio::join!(first, second);
    first?;
    second?;

    let document = read_manifest(fixture.root()).await.expect("manifest exists");
    assert_eq!(document.kits.len(), 2);
    assert_eq!(document.kit_files("engineer")[0].path, "a.md");
    assert_eq!(document.kit_files("marketing")[0].path, "b.md");
    Ok(())
}

#[tokio::test]
async fn full_uninstall_covers_every_tracked_file() -> Result<()> {
    let fixture = KitFixture::new()?;
    fixture
        .install("engineer", "1.0.0", &[("a.md", A_V1), ("b.md", B_V1)])
        .await?;
    fixture
        .install("marketing", "1.0.0", &[("m.md", "campaign notes\n")])
        .await?;

    let analysis = analyze_installation(fixture.root(), None, false).await;

    let mut deleted: Vec<&str> = analysis
        .to_delete
        .iter()
        .map(|action| action.path.as_str())
        .collect();
    deleted.sort_unstable();
    assert_eq!(deleted, vec![".oxikit/manifest.json", "a.md", "b.md", "m.md"]);
    assert!(analysis.remaining_kits.is_empty());
    Ok(())
}
