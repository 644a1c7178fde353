//! Tests for the sequence subcommand in dry-run mode.
// Test module - relaxed lint rules
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]

use serde_json::Value;
use skyrun::schedule::Schedule;
use skyrun::Target;
use skyrun_fixtures::write_schedule;
use std::path::Path;
use std::process::{Command, Output};

fn skyrun_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_skyrun"))
}

fn schedule_with(targets: Vec<Target>) -> Schedule {
    Schedule {
        targets,
        ..Schedule::default()
    }
}

fn dry_run(schedule: &Path, extra: &[&str]) -> Output {
    skyrun_bin()
        .args(["sequence", "--dry-run", "--test-mode", "--fault-fraction", "0"])
        .arg("--schedule")
        .arg(schedule)
        .args(extra)
        .output()
        .expect("failed to execute")
}

#[test]
fn dry_run_echoes_each_invocation_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("night.json");
    write_schedule(
        &path,
        &schedule_with(vec![
            Target::numeric("M51", 202.47, 47.19, 10.0, 600.0),
            Target::numeric("M101", 210.8, 54.35, 20.0, 900.0),
        ]),
    );

    let output = dry_run(&path, &[]);

    assert!(
        output.status.success(),
        "dry run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2, "stdout: {stdout}");
    assert!(lines[0].starts_with("M51 "));
    assert!(lines[1].starts_with("M101 "));
}

#[test]
fn json_report_is_the_only_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("night.json");
    let mut bad = Target::numeric("broken", 10.0, 20.0, 10.0, 60.0);
    bad.dec = Value::String("up".into());
    write_schedule(
        &path,
        &schedule_with(vec![bad, Target::numeric("M13", 250.42, 36.46, 10.0, 60.0)]),
    );

    let output = dry_run(&path, &["--json"]);

    assert_eq!(output.status.code(), Some(1), "a rejected target fails the run");
    let report: Value = serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(report["status"], "failed");
    assert_eq!(report["stop_reason"], "finished");
    assert_eq!(report["targets"][0]["status"], "rejected");
    assert_eq!(report["targets"][0]["attempts"], 0);
    assert_eq!(report["targets"][1]["status"], "completed");
}

#[test]
fn missing_schedule_file_exits_with_io_code() {
    let dir = tempfile::tempdir().unwrap();
    let output = dry_run(&dir.path().join("absent.json"), &[]);

    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error"));
}
