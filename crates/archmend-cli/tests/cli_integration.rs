use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use archmend_testing::{ArchiveBuilder, text_block, tool_result_block};

fn archmend() -> Command {
    Command::cargo_bin("archmend").unwrap()
}

fn orphan_archive(dir: &TempDir) -> std::path::PathBuf {
    ArchiveBuilder::new("cli-sess")
        .user("m1", None, "2025-01-01T10:00:10Z", "please fix the loader")
        .assistant(
            "m2",
            Some("m1"),
            "2025-01-01T10:00:20Z",
            "the loader is fixed",
        )
        .user("m3", None, "2025-01-01T10:00:22Z", "thanks, loader is fixed")
        .write_into(dir.path())
        .unwrap()
}

#[test]
fn analyze_reports_orphans() {
    let dir = TempDir::new().unwrap();
    let archive = orphan_archive(&dir);

    archmend()
        .arg("--data-dir")
        .arg(dir.path().join("workspace"))
        .arg("analyze")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 messages"))
        .stdout(predicate::str::contains("1 orphans"));
}

#[test]
fn analyze_json_output() {
    let dir = TempDir::new().unwrap();
    let archive = orphan_archive(&dir);

    let output = archmend()
        .arg("--data-dir")
        .arg(dir.path().join("workspace"))
        .arg("--json")
        .arg("analyze")
        .arg(&archive)
        .output()
        .unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["orphan_count"], 1);
    assert_eq!(parsed["message_count"], 3);
}

#[test]
fn suggest_ranks_the_reply_first() {
    let dir = TempDir::new().unwrap();
    let archive = orphan_archive(&dir);

    archmend()
        .arg("--data-dir")
        .arg(dir.path().join("workspace"))
        .arg("suggest")
        .arg(&archive)
        .arg("m3")
        .assert()
        .success()
        .stdout(predicate::str::contains("m2"));
}

#[test]
fn repair_then_undo_round_trip() {
    let dir = TempDir::new().unwrap();
    let archive = orphan_archive(&dir);
    let workspace = dir.path().join("workspace");
    let before = std::fs::read_to_string(&archive).unwrap();

    archmend()
        .arg("--data-dir")
        .arg(&workspace)
        .arg("repair")
        .arg(&archive)
        .arg("m3")
        .arg("m2")
        .assert()
        .success()
        .stdout(predicate::str::contains("orphans now 0"));
    assert_ne!(std::fs::read_to_string(&archive).unwrap(), before);

    archmend()
        .arg("--data-dir")
        .arg(&workspace)
        .arg("undo")
        .arg(&archive)
        .assert()
        .success();
    assert_eq!(std::fs::read_to_string(&archive).unwrap(), before);
}

#[test]
fn invalid_repair_exits_3() {
    let dir = TempDir::new().unwrap();
    let archive = ArchiveBuilder::new("cli-cycle")
        .user("m1", None, "2025-01-01T10:00:10Z", "one")
        .assistant("m2", Some("m1"), "2025-01-01T10:00:20Z", "two")
        .user("m3", Some("m2"), "2025-01-01T10:00:30Z", "three")
        .write_into(dir.path())
        .unwrap();

    archmend()
        .arg("--data-dir")
        .arg(dir.path().join("workspace"))
        .arg("repair")
        .arg(&archive)
        .arg("m1")
        .arg("m3")
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("no_cycle"));
}

#[test]
fn unreadable_baseline_exits_2() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("broken.jsonl");
    std::fs::write(&archive, "not json at all\n{ also broken\n").unwrap();

    archmend()
        .arg("--data-dir")
        .arg(dir.path().join("workspace"))
        .arg("analyze")
        .arg(&archive)
        .assert()
        .failure()
        .code(2);
}

#[test]
fn dedup_via_events_backend() {
    let dir = TempDir::new().unwrap();
    let archive = ArchiveBuilder::new("cli-dedup")
        .user("m1", None, "2025-01-01T10:00:10Z", "run it")
        .with_blocks(
            "user",
            "m2",
            Some("m1"),
            "2025-01-01T10:00:20Z",
            vec![
                text_block("hi"),
                tool_result_block("TR1"),
                tool_result_block("TR1"),
            ],
        )
        .write_into(dir.path())
        .unwrap();

    archmend()
        .arg("--data-dir")
        .arg(dir.path().join("workspace"))
        .arg("--backend")
        .arg("events")
        .arg("dedup")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 changes applied"));

    // The event provider never touches the archive; restore shows the state
    archmend()
        .arg("--data-dir")
        .arg(dir.path().join("workspace"))
        .arg("--backend")
        .arg("events")
        .arg("restore")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("version 1"));
}

#[test]
fn history_lists_applied_operations() {
    let dir = TempDir::new().unwrap();
    let archive = orphan_archive(&dir);
    let workspace = dir.path().join("workspace");

    archmend()
        .arg("--data-dir")
        .arg(&workspace)
        .arg("repair")
        .arg(&archive)
        .arg("m3")
        .arg("m2")
        .assert()
        .success();

    archmend()
        .arg("--data-dir")
        .arg(&workspace)
        .arg("history")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 entries"))
        .stdout(predicate::str::contains("m3"));
}
