//! Integration tests for the `nasshape` CLI binary.
//!
//! These tests validate argument parsing, config handling, policy snapshot
//! errors and the commands that need no live router.
#![allow(clippy::unwrap_used)]

use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `nasshape` binary with env isolation.
///
/// Clears `NASSHAPE_*` variables and points config lookups at a
/// nonexistent path so tests never touch the user's real configuration.
fn nasshape_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("nasshape");
    cmd.env("HOME", "/tmp/nasshape-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/nasshape-cli-test-nonexistent")
        .env_remove("NASSHAPE_CONFIG")
        .env_remove("NASSHAPE_POLICY")
        .env_remove("NASSHAPE_OUTPUT")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Subscribers 5 and 6 offline on a service with a nightly boost rule.
const SNAPSHOT: &str = r#"
[[services]]
id = 1
name = "home-20"
download_kbps = 20480
upload_kbps = 5120

[[bandwidth_rules]]
id = 1
name = "night boost"
start = "22:00"
end = "06:00"
download_multiplier = 150
upload_multiplier = 120
auto_apply = true

[[traffic_classes]]
id = 1
name = "netflix"
subnets = "45.57.0.0/17, 198.38.96.0/19"

[[subscribers]]
id = 5
username = "alice"
service_id = 1
daily_fup_level = 1
monthly_fup_level = 2
monthly_quota_used = 900000000

[[subscribers]]
id = 6
username = "bob"
service_id = 1
"#;

fn write_snapshot(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("policy.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = nasshape_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    nasshape_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("reconcile-class")
            .and(predicate::str::contains("apply-rule"))
            .and(predicate::str::contains("bulk-reset"))
            .and(predicate::str::contains("watch")),
    );
}

#[test]
fn test_version_flag() {
    nasshape_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("nasshape"));
}

#[test]
fn test_bulk_reset_rejects_unknown_kind() {
    nasshape_cmd()
        .args(["bulk-reset", "--kind", "weekly", "5"])
        .assert()
        .code(2);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_show_prints_defaults() {
    let dir = tempfile::tempdir().unwrap();
    nasshape_cmd()
        .args(["config", "show", "--config"])
        .arg(dir.path().join("absent.toml"))
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[engine]")
                .and(predicate::str::contains("queue_capacity = 64"))
                .and(predicate::str::contains("default_port = 3799")),
        );
}

#[test]
fn test_invalid_config_exits_with_config_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[engine]\nmax_attempts = 0\n").unwrap();
    let output = nasshape_cmd()
        .args(["config", "show", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(6));
    assert!(combined_output(&output).contains("engine.max_attempts"));
}

// ── Policy snapshot ─────────────────────────────────────────────────

#[test]
fn test_missing_policy_is_reported() {
    let output = nasshape_cmd()
        .args(["evaluate", "--config", "/tmp/nasshape-cli-test-nonexistent/c.toml"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(6));
    assert!(combined_output(&output).contains("No policy snapshot"));
}

#[test]
fn test_malformed_policy_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let policy = write_snapshot(&dir, "[[subscribers]\nid = 1\n");
    nasshape_cmd()
        .arg("--policy")
        .arg(&policy)
        .arg("evaluate")
        .assert()
        .code(6)
        .stderr(predicate::str::contains("not valid TOML"));
}

#[test]
fn test_malformed_subnets_fail_validation() {
    let dir = tempfile::tempdir().unwrap();
    let policy = write_snapshot(
        &dir,
        "[[traffic_classes]]\nid = 1\nname = \"bad\"\nsubnets = \"10.0.0.0/8, not-a-net\"\n",
    );
    nasshape_cmd()
        .arg("--policy")
        .arg(&policy)
        .args(["reconcile-class", "bad"])
        .assert()
        .code(2);
}

// ── Engine commands without routers ─────────────────────────────────

#[test]
fn test_evaluate_at_night_picks_boost_rule() {
    let dir = tempfile::tempdir().unwrap();
    let policy = write_snapshot(&dir, SNAPSHOT);
    let output = nasshape_cmd()
        .arg("--policy")
        .arg(&policy)
        .args(["evaluate", "--at", "2026-10-15T23:00:00+00:00", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed[0]["scope"]["kind"], "service");
    assert_eq!(parsed[0]["rule_id"], 1);
    assert_eq!(parsed[0]["multiplier"]["download"], 150);
}

#[test]
fn test_evaluate_at_noon_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let policy = write_snapshot(&dir, SNAPSHOT);
    nasshape_cmd()
        .arg("--policy")
        .arg(&policy)
        .args(["evaluate", "--at", "2026-10-15T12:00:00+00:00"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(none)"));
}

#[test]
fn test_bulk_reset_skips_unknown_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let policy = write_snapshot(&dir, SNAPSHOT);
    nasshape_cmd()
        .arg("--policy")
        .arg(&policy)
        .args(["bulk-reset", "--kind", "monthly", "5", "6", "99"])
        .assert()
        .success()
        .stdout(predicate::str::contains("monthly reset: 2 of 3 subscribers updated"));
}

#[test]
fn test_reset_unknown_subscriber_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let policy = write_snapshot(&dir, SNAPSHOT);
    nasshape_cmd()
        .arg("--policy")
        .arg(&policy)
        .args(["reset-fup", "99"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_reconcile_class_without_devices_plans_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let policy = write_snapshot(&dir, SNAPSHOT);
    nasshape_cmd()
        .arg("--policy")
        .arg(&policy)
        .args(["reconcile-class", "netflix"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 queued"));
}

#[test]
fn test_apply_disabled_rule_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = format!(
        "{SNAPSHOT}\n[[bandwidth_rules]]\nid = 2\nname = \"off\"\nstart = \"00:00\"\nend = \"00:00\"\nenabled = false\n"
    );
    let policy = write_snapshot(&dir, &snapshot);
    nasshape_cmd()
        .arg("--policy")
        .arg(&policy)
        .args(["apply-rule", "2"])
        .assert()
        .code(2);
}
