//! Corruption recovery tests for tend.
//!
//! These tests verify the system can handle:
//! - Corrupted trigger book
//! - Corrupted outbox
//! - Corrupted journal lines
//! - Corrupted subjects (refused rather than overwritten)
//! - Stored subjects that no longer validate (kept, not scheduled)

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::Write as IoWrite;
use std::path::Path;
use tempfile::TempDir;

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn tend(data_dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tend"));
    cmd.arg("--data-dir")
        .arg(data_dir)
        .arg("--config")
        .arg(data_dir.join("config.toml"));
    cmd
}

fn add_medication(data_dir: &Path) {
    tend(data_dir)
        .args(["add-medication", "Lisinopril", "--time", "09:00"])
        .args(["--now", "2024-01-01T00:00:00Z"])
        .assert()
        .success();
}

fn outbox_len(data_dir: &Path) -> usize {
    let contents = fs::read_to_string(data_dir.join("outbox.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
    value.as_object().map(|o| o.len()).unwrap_or(0)
}

#[test]
fn test_corrupted_trigger_book() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_medication(data_dir);

    fs::write(data_dir.join("triggers.json"), "{ invalid json }}}}").unwrap();

    // Everything is re-registered under the same ids
    tend(data_dir)
        .args(["sync", "--now", "2024-01-01T00:00:00Z"])
        .assert()
        .success();

    assert_eq!(outbox_len(data_dir), 60);
    let contents = fs::read_to_string(data_dir.join("triggers.json")).unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&contents).is_ok());
}

#[test]
fn test_corrupted_outbox() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    fs::write(data_dir.join("outbox.json"), "not json at all").unwrap();
    add_medication(data_dir);

    assert_eq!(outbox_len(data_dir), 60);
}

#[test]
fn test_partial_journal_line() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_medication(data_dir);

    tend(data_dir)
        .args(["sync", "--now", "2024-01-05T00:00:00Z"])
        .assert()
        .success();
    tend(data_dir)
        .args(["sync", "--now", "2024-01-13T00:00:00Z"])
        .assert()
        .success();

    // Simulate a crash mid-append
    let journal = data_dir.join("wal/resolved_triggers.wal");
    let mut file = fs::OpenOptions::new().append(true).open(&journal).unwrap();
    write!(file, "{{\"id\": \"trunc").unwrap();
    drop(file);

    tend(data_dir)
        .arg("rollup")
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled up 4 resolved reminders"));
}

#[test]
fn test_corrupted_subjects_are_not_overwritten() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    fs::write(data_dir.join("subjects.json"), "[{ broken").unwrap();

    tend(data_dir)
        .args(["add-medication", "Lisinopril", "--time", "09:00"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Json"));

    let contents = fs::read_to_string(data_dir.join("subjects.json")).unwrap();
    assert_eq!(contents, "[{ broken");
}

#[test]
fn test_invalid_stored_subject_is_kept() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_medication(data_dir);

    // Hand-edited into a rule that can't validate
    let path = data_dir.join("subjects.json");
    let mut subjects: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    subjects[0]["rule"] = serde_json::json!({
        "type": "monthly",
        "day_of_month": 40,
        "times": ["09:00"]
    });
    fs::write(&path, serde_json::to_string(&subjects).unwrap()).unwrap();

    tend(data_dir)
        .args(["add-medication", "Vitamin D", "--time", "08:00"])
        .args(["--now", "2024-01-01T00:00:00Z"])
        .assert()
        .success();

    let saved: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let saved = saved.as_array().unwrap();
    assert_eq!(saved.len(), 2);
    assert!(saved.iter().any(|s| s["rule"]["day_of_month"] == 40));
    // Only Vitamin D is scheduled
    assert_eq!(outbox_len(data_dir), 60);

    tend(data_dir)
        .args(["list", "--now", "2024-01-01T00:00:00Z"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Lisinopril [invalid]"));
}
