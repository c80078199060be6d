//! CLI tests for the `pw` binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// A `pw` command isolated from the user's config, data and log directories
fn pw(home: &Path) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("pw");
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("XDG_DATA_HOME", home.join(".local/share"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

fn write_phases(dir: &Path, name: &str, phases: &[&str]) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, phases.join("\n")).unwrap();
    path
}

fn mount_then_updates(n: usize) -> Vec<&'static str> {
    std::iter::once("initial").chain(std::iter::repeat_n("update", n)).collect()
}

#[test]
fn test_help_lists_commands() {
    let temp = TempDir::new().unwrap();
    pw(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("detect"))
        .stdout(predicate::str::contains("replay"));
}

#[test]
fn test_detect_clean_history() {
    let temp = TempDir::new().unwrap();
    let file = write_phases(temp.path(), "counter.jsonl", &mount_then_updates(10));

    pw(temp.path())
        .arg("detect")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("No update loop"))
        .stdout(predicate::str::contains("counter"));
}

#[test]
fn test_detect_loop_exits_nonzero() {
    let temp = TempDir::new().unwrap();
    let file = write_phases(temp.path(), "counter.jsonl", &mount_then_updates(11));

    pw(temp.path())
        .arg("detect")
        .arg(&file)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Update loop detected"))
        .stdout(predicate::str::contains("positions: 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, +1 more"));
}

#[test]
fn test_detect_json_report() {
    let temp = TempDir::new().unwrap();
    let file = write_phases(temp.path(), "h.jsonl", &mount_then_updates(4));

    let output = pw(temp.path())
        .args(["detect", "--max-update", "3", "--format", "json"])
        .arg(&file)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "violation");
    assert_eq!(report["run-length"], 4);
    assert_eq!(report["start-pos"], 2);
    assert_eq!(report["end-pos"], 5);
}

#[test]
fn test_detect_uses_config_thresholds() {
    let temp = TempDir::new().unwrap();
    let file = write_phases(temp.path(), "h.jsonl", &mount_then_updates(3));
    let config = temp.path().join("pw.yml");
    fs::write(&config, "detector:\n  max-consecutive-update: 2\n").unwrap();

    pw(temp.path())
        .arg("--config")
        .arg(&config)
        .arg("detect")
        .arg(&file)
        .assert()
        .code(1);
}

#[test]
fn test_detect_rejects_zero_threshold() {
    let temp = TempDir::new().unwrap();
    let file = write_phases(temp.path(), "h.jsonl", &mount_then_updates(1));

    pw(temp.path())
        .args(["detect", "--max-update", "0"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("positive integer"));
}

#[test]
fn test_stats_json() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("timed.jsonl");
    fs::write(
        &file,
        concat!(
            r#"{"phase":"initial","seq":1,"ts":"2026-01-01T00:00:00Z","duration_ms":4.0}"#,
            "\n",
            r#"{"phase":"update","seq":2,"ts":"2026-01-01T00:00:01Z","duration_ms":2.0}"#,
            "\n",
            "nested-update\n",
        ),
    )
    .unwrap();

    let output = pw(temp.path()).args(["stats", "-f", "json"]).arg(&file).output().unwrap();
    assert!(output.status.success());

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["events"], 3);
    assert_eq!(stats["phases"]["nested-update"], 1);
    assert_eq!(stats["timed-events"], 2);
    assert_eq!(stats["average-duration-ms"], 3.0);
}

#[test]
fn test_replay_count_satisfied() {
    let temp = TempDir::new().unwrap();
    let file = write_phases(temp.path(), "h.jsonl", &mount_then_updates(2));

    pw(temp.path())
        .args(["replay", "--count", "3", "--timeout-ms", "200"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("exactly 3 renders"));
}

#[test]
fn test_replay_timeout_exits_nonzero() {
    let temp = TempDir::new().unwrap();
    let file = write_phases(temp.path(), "h.jsonl", &mount_then_updates(1));

    pw(temp.path())
        .args(["replay", "--phase", "nested-update", "--timeout-ms", "50"])
        .arg(&file)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Timed out"));
}

#[test]
fn test_replay_negated_passes_when_quiet() {
    let temp = TempDir::new().unwrap();
    let file = write_phases(temp.path(), "h.jsonl", &mount_then_updates(2));

    pw(temp.path())
        .args(["replay", "--not", "--phase", "nested-update", "--timeout-ms", "50"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("never saw"));
}

#[test]
fn test_replay_rejects_invalid_timeout() {
    let temp = TempDir::new().unwrap();
    let file = write_phases(temp.path(), "h.jsonl", &mount_then_updates(1));

    pw(temp.path())
        .args(["replay", "--min", "1", "--timeout-ms", "-5"])
        .arg(&file)
        .assert()
        .failure();
}

#[test]
fn test_replay_rejects_out_of_range_timeout() {
    let temp = TempDir::new().unwrap();
    let file = write_phases(temp.path(), "h.jsonl", &mount_then_updates(1));

    pw(temp.path())
        .args(["replay", "--count", "3", "-t", "1e30"])
        .arg(&file)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("out of range"))
        .stderr(predicate::str::contains("panicked").not());
}

#[test]
fn test_replay_record_then_list_runs() {
    let temp = TempDir::new().unwrap();
    let file = write_phases(temp.path(), "h.jsonl", &mount_then_updates(2));
    let runs = temp.path().join("runs");
    let config = temp.path().join("pw.yml");
    fs::write(&config, format!("recorder:\n  runs-dir: {}\n", runs.display())).unwrap();

    pw(temp.path())
        .arg("-c")
        .arg(&config)
        .args(["replay", "--min", "3", "--record"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded to"));

    pw(temp.path())
        .arg("-c")
        .arg(&config)
        .arg("runs")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 events"));
}
