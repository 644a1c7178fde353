//! Tests for global flags, help output and shell completions.
// Test module - relaxed lint rules
#![allow(clippy::expect_used)]

use std::process::Command;

fn skyrun_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_skyrun"))
}

#[test]
fn help_lists_every_subcommand() {
    let output = skyrun_bin().arg("--help").output().expect("failed to execute");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["run-target", "sequence", "shutdown", "completions"] {
        assert!(stdout.contains(name), "help should mention {name}: {stdout}");
    }
}

#[test]
fn color_flag_accepts_known_modes() {
    for mode in ["auto", "always", "never"] {
        let output = skyrun_bin()
            .arg(format!("--color={mode}"))
            .arg("--help")
            .output()
            .expect("failed to execute");

        assert!(
            output.status.success(),
            "--color={mode} should be accepted: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

#[test]
fn color_flag_rejects_invalid() {
    let output = skyrun_bin()
        .arg("--color=sometimes")
        .arg("--help")
        .output()
        .expect("failed to execute");

    assert!(!output.status.success());
}

#[test]
fn completions_bash_mentions_binary() {
    let output = skyrun_bin()
        .args(["completions", "bash"])
        .output()
        .expect("failed to execute");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("skyrun"));
    assert!(stdout.contains("run-target"));
}

#[test]
fn run_target_requires_all_positionals() {
    let output = skyrun_bin()
        .args(["run-target", "M42", "83.8"])
        .output()
        .expect("failed to execute");

    assert_eq!(output.status.code(), Some(2), "clap usage errors exit 2");
}
