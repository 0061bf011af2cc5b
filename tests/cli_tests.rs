//! Integration tests for the CLI interface
//!
//! Tests argument parsing and the status/clean subcommands against a
//! temporary state directory. Scans themselves are covered by the
//! lifecycle tests; nothing here talks to the network.

use assert_cmd::Command;
use chrono::Utc;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use vigil::client::mock::{compliant_result, partial_result};
use vigil::scan::checkpoint::{Checkpoint, CheckpointPhase, CHECKPOINT_VERSION};
use vigil::scan::model::RepoInfo;

/// Drops a plaintext checkpoint where the CLI's state directory will
/// look for it, as an interrupted `vigil scan` would have left one.
fn write_checkpoint(state_dir: &Path, org: &str) -> PathBuf {
    let dir = state_dir.join("checkpoints");
    std::fs::create_dir_all(&dir).unwrap();
    let checkpoint = Checkpoint {
        version: CHECKPOINT_VERSION,
        org: org.to_string(),
        results: vec![compliant_result("repo-1"), partial_result("repo-2")],
        remaining: vec![RepoInfo {
            name: "repo-3".to_string(),
            full_name: format!("{org}/repo-3"),
            private: false,
            archived: false,
        }],
        offset: 2,
        batch_size: 5,
        continuation_count: 1,
        phase: CheckpointPhase::Scanning,
        saved_at: Utc::now(),
    };
    let path = dir.join(format!("{org}.checkpoint"));
    std::fs::write(&path, serde_json::to_vec_pretty(&checkpoint).unwrap()).unwrap();
    path
}

#[test]
fn test_cli_requires_a_subcommand() {
    // Running without arguments prints usage and fails
    let mut cmd = Command::cargo_bin("vigil").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_cli_help_flag() {
    // Explicit help lists every subcommand
    let mut cmd = Command::cargo_bin("vigil").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("security compliance scanner"))
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("clean"));
}

#[test]
fn test_scan_help_lists_flags() {
    let mut cmd = Command::cargo_bin("vigil").unwrap();
    cmd.arg("scan")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Scan every repository in an organization"))
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--resume"))
        .stdout(predicate::str::contains("--output"))
        .stdout(predicate::str::contains("--no-save"));
}

#[test]
fn test_version_flag() {
    let mut cmd = Command::cargo_bin("vigil").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vigil"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("vigil").unwrap();
    cmd.arg("audit")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_scan_requires_an_org() {
    let mut cmd = Command::cargo_bin("vigil").unwrap();
    cmd.arg("scan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_scan_rejects_non_numeric_batch_size() {
    // Fails in argument parsing, before anything touches the network
    let mut cmd = Command::cargo_bin("vigil").unwrap();
    cmd.args(["scan", "acme", "--batch-size", "lots"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_status_without_saved_scan() {
    let state_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("vigil").unwrap();
    cmd.env("VIGIL_STATE_DIR", state_dir.path())
        .args(["status", "ghost-org"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No saved scan"));
}

#[test]
fn test_status_shows_saved_progress() {
    let state_dir = TempDir::new().unwrap();
    write_checkpoint(state_dir.path(), "acme");

    let mut cmd = Command::cargo_bin("vigil").unwrap();
    cmd.env("VIGIL_STATE_DIR", state_dir.path())
        .args(["status", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved scan for 'acme'"))
        .stdout(predicate::str::contains("2/3 repositories (66.7%)"))
        .stdout(predicate::str::contains("Batch size:    5"))
        .stdout(predicate::str::contains("Continuations: 1"))
        .stdout(predicate::str::contains("Resume with: vigil scan acme --resume"));
}

#[test]
fn test_clean_without_saved_scan() {
    let state_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("vigil").unwrap();
    cmd.env("VIGIL_STATE_DIR", state_dir.path())
        .args(["clean", "ghost-org"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No saved scan found for 'ghost-org'"));
}

#[test]
fn test_clean_removes_saved_scan() {
    let state_dir = TempDir::new().unwrap();
    let path = write_checkpoint(state_dir.path(), "acme");
    assert!(path.exists());

    let mut cmd = Command::cargo_bin("vigil").unwrap();
    cmd.env("VIGIL_STATE_DIR", state_dir.path())
        .args(["clean", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed saved scan for 'acme'"));
    assert!(!path.exists());
}
