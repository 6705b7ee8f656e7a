//! Integration tests for basic CLI behavior.
//!
//! Tests that the binary exists, accepts standard flags, each subcommand
//! responds to `--help`, and the ffmpeg-free `chunks` path works end to end.

#![allow(deprecated)] // cargo_bin deprecation, replacement not yet stable

use assert_cmd::Command;
use predicates::prelude::*;

/// Helper: get a Command for the `boxreel` binary.
fn boxreel() -> Command {
    let mut cmd = Command::cargo_bin("boxreel").expect("binary 'boxreel' should be built");
    // Keep a developer's real config out of the tests.
    cmd.env("XDG_CONFIG_HOME", std::env::temp_dir().join("boxreel-cli-tests"));
    cmd
}

/// Write a detection log into a fresh temp dir.
fn detection_log(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("detections.jsonl");
    std::fs::write(&path, lines.join("\n")).unwrap();
    (dir, path)
}

// ─── Top-level flags ─────────────────────────────────────────────────────────

#[test]
fn help_flag_shows_usage() {
    boxreel()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: boxreel"))
        .stdout(predicate::str::contains("probe"))
        .stdout(predicate::str::contains("chunks"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("preview"));
}

#[test]
fn version_flag_shows_semver() {
    boxreel()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^boxreel \d+\.\d+\.\d+\n$").unwrap());
}

#[test]
fn no_args_shows_error_and_usage() {
    boxreel()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage: boxreel"));
}

#[test]
fn invalid_subcommand_fails() {
    boxreel()
        .arg("this-is-not-a-real-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

// ─── Subcommand help ─────────────────────────────────────────────────────────

#[test]
fn export_help() {
    boxreel()
        .args(["export", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--detections"))
        .stdout(predicate::str::contains("--full"))
        .stdout(predicate::str::contains("--labels"))
        .stdout(predicate::str::contains("--max-span"));
}

#[test]
fn preview_help() {
    boxreel()
        .args(["preview", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--at"));
}

#[test]
fn export_requires_output() {
    boxreel()
        .args(["export", "clip.mov", "--detections", "d.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--output"));
}

// ─── chunks ──────────────────────────────────────────────────────────────────

#[test]
fn chunks_coalesces_buckets() {
    let (_dir, log) = detection_log(&[
        r#"{"time": 2.1, "label": "person", "confidence": 0.9, "bbox": [0.1, 0.1, 0.2, 0.2]}"#,
        r#"{"time": 5.5, "label": "person", "confidence": 0.8, "bbox": [0.1, 0.1, 0.2, 0.2]}"#,
        r#"{"time": 9.0, "label": "person", "confidence": 0.7, "bbox": [0.1, 0.1, 0.2, 0.2]}"#,
        r#"{"time": 21.4, "label": "person", "confidence": 0.6, "bbox": [0.1, 0.1, 0.2, 0.2]}"#,
    ]);

    boxreel()
        .args(["chunks", "--duration", "25", "--detections"])
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("chunk 1: 2.00s - 12.00s (10.00s)"))
        .stdout(predicate::str::contains("chunk 2: 21.00s - 25.00s (4.00s)"))
        .stdout(predicate::str::contains("2 chunks"));
}

#[test]
fn chunks_ignores_other_labels() {
    let (_dir, log) = detection_log(&[
        r#"{"time": 3.0, "label": "dog", "confidence": 0.9, "bbox": [0.1, 0.1, 0.2, 0.2]}"#,
    ]);

    boxreel()
        .args(["chunks", "--duration", "30", "--detections"])
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("No detections"));
}

#[test]
fn chunks_respects_max_span() {
    let (_dir, log) = detection_log(&[
        r#"{"time": 0.5, "label": "person", "bbox": [0.1, 0.1, 0.2, 0.2]}"#,
        r#"{"time": 4.5, "label": "person", "bbox": [0.1, 0.1, 0.2, 0.2]}"#,
    ]);

    boxreel()
        .args(["chunks", "--duration", "30", "--max-span", "3", "--detections"])
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("chunk 1: 0.00s - 3.00s"))
        .stdout(predicate::str::contains("chunk 2: 4.00s - 7.00s"));
}

#[test]
fn chunks_reports_malformed_log() {
    let (_dir, log) = detection_log(&["{not json"]);

    boxreel()
        .args(["chunks", "--duration", "30", "--detections"])
        .arg(&log)
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 1"));
}

#[test]
fn chunks_needs_duration_or_video() {
    boxreel()
        .args(["chunks", "--detections", "d.jsonl"])
        .assert()
        .failure();
}

#[test]
fn chunks_rejects_zero_max_span() {
    let (_dir, log) = detection_log(&[
        r#"{"time": 3.0, "label": "person", "bbox": [0.1, 0.1, 0.2, 0.2]}"#,
    ]);

    boxreel()
        .args(["chunks", "--duration", "30", "--max-span", "0", "--detections"])
        .arg(&log)
        .assert()
        .failure()
        .stderr(predicate::str::contains("chunk span must be a positive"));
}
