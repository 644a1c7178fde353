//! Tests for the run-target subcommand.
// Test module - relaxed lint rules
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use skyrun_fixtures::FakeScope;
use std::process::Command;
use std::time::Duration;

fn skyrun_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_skyrun"))
}

#[test]
fn malformed_coordinate_is_rejected_before_connecting() {
    let scope = FakeScope::start();
    let output = skyrun_bin()
        .args(["run-target", "M42", "north-ish", "-5.39", "10", "60"])
        .args(["--host", "127.0.0.1", "--port"])
        .arg(scope.addr().port().to_string())
        .output()
        .expect("failed to execute");

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(scope.connections(), 0, "device must not be contacted");
}

#[test]
fn non_positive_exposure_is_rejected() {
    let output = skyrun_bin()
        .args(["run-target", "M42", "83.8", "-5.39", "0", "60"])
        .output()
        .expect("failed to execute");

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn completed_goto_exits_zero_and_drives_the_device() {
    let scope = FakeScope::start();
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("session.json");
    std::fs::write(
        &config_path,
        serde_json::to_vec(&scope.session_config()).unwrap(),
    )
    .unwrap();

    let output = skyrun_bin()
        .args(["run-target", "M42", "05:35:17", "-05:23:28", "10", "0.2"])
        .arg("--config")
        .arg(&config_path)
        .output()
        .expect("failed to execute");

    assert!(
        output.status.success(),
        "run-target failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(scope.wait_for_methods(Duration::from_secs(2), |methods| {
        methods.iter().any(|m| m == "iscope_stop_view")
    }));
    let methods = scope.methods();
    let start_view = methods.iter().position(|m| m == "iscope_start_view").unwrap();
    let start_stack = methods.iter().position(|m| m == "iscope_start_stack").unwrap();
    assert!(start_view < start_stack);
}

#[test]
fn failed_goto_exits_non_zero() {
    let scope = FakeScope::builder().goto_events(&["working", "fail"]).start();
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("session.json");
    std::fs::write(
        &config_path,
        serde_json::to_vec(&scope.session_config()).unwrap(),
    )
    .unwrap();

    let output = skyrun_bin()
        .args(["run-target", "M42", "83.8", "-5.39", "10", "0.2"])
        .arg("--config")
        .arg(&config_path)
        .output()
        .expect("failed to execute");

    assert_eq!(output.status.code(), Some(1));
    assert!(!scope.methods().iter().any(|m| m == "iscope_start_stack"));
}
