// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::float_cmp)]
#![allow(missing_docs)]

//! Device session against the fake telescope.
//!
//! Covers the goto/wait protocol, frame reassembly across chunked writes,
//! heartbeats while waiting, and the full per-target routine.

use serde_json::{json, Value};
use skyrun::config::SessionConfig;
use skyrun::session::{DeviceSession, WaitOptions};
use skyrun::{ErrorCode, OperationState, TargetRequest};
use skyrun_fixtures::FakeScope;
use std::time::Duration;

// =============================================================================
// Helper Functions
// =============================================================================

fn connect(scope: &FakeScope) -> DeviceSession {
    DeviceSession::connect(scope.session_config()).expect("session connects to fake scope")
}

fn connect_with(config: SessionConfig) -> DeviceSession {
    DeviceSession::connect(config).expect("session connects to fake scope")
}

fn command(scope: &FakeScope, method: &str) -> Value {
    scope
        .commands()
        .into_iter()
        .find(|cmd| cmd["method"] == method)
        .unwrap_or_else(|| panic!("no {method} command in {:?}", scope.methods()))
}

// =============================================================================
// Goto / wait
// =============================================================================

#[test]
fn goto_completes_after_working_then_complete() {
    let scope = FakeScope::builder().goto_events(&["working", "complete"]).start();
    let session = connect(&scope);

    session.goto_target(190.9, 47.2, "M51", 10.0, 60.0).unwrap();
    let state = session.wait_for_completion(&WaitOptions::from_config(session.config())).unwrap();

    assert_eq!(state, OperationState::Complete);
    assert!(session.close());
}

#[test]
fn goto_reports_fail_after_several_working_events() {
    let scope = FakeScope::builder()
        .goto_events(&["working", "working", "working", "fail"])
        .start();
    let session = connect(&scope);

    session.goto_target(210.8, 54.3, "M101", 10.0, 60.0).unwrap();
    let state = session.wait_for_completion(&WaitOptions::from_config(session.config())).unwrap();

    assert_eq!(state, OperationState::Fail);
    session.close();
}

#[test]
fn goto_sends_exposure_and_view_parameters() {
    let scope = FakeScope::start();
    let session = connect(&scope);

    session.goto_target(190.9, 47.2, "M51", 10.0, 60.0).unwrap();
    session.wait_for_completion(&WaitOptions::from_config(session.config())).unwrap();
    session.close();

    assert_eq!(
        command(&scope, "set_stack_setting")["params"],
        json!({"save_discrete_frame": true})
    );
    assert_eq!(
        command(&scope, "set_setting")["params"],
        json!({"exp_ms": {"stack_l": 10000, "continous": 60000}})
    );
    assert_eq!(
        command(&scope, "iscope_start_view")["params"],
        json!({"mode": "star", "target_ra_dec": [190.9, 47.2], "target_name": "M51", "lp_filter": 1})
    );
}

#[test]
fn command_ids_start_at_base_and_increase() {
    let scope = FakeScope::start();
    let session = connect(&scope);
    for _ in 0..5 {
        session.heartbeat().unwrap();
    }
    assert!(scope.wait_for_methods(Duration::from_secs(2), |m| m.len() >= 6));
    session.close();

    let ids: Vec<u64> = scope
        .commands()
        .iter()
        .map(|cmd| cmd["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids.first(), Some(&999));
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]), "{ids:?}");
}

#[test]
fn chunked_frames_are_reassembled() {
    let scope = FakeScope::builder()
        .chunked(3)
        .goto_events(&["working", "complete"])
        .start();
    let session = connect(&scope);

    session.goto_target(83.82, -5.39, "M42", 5.0, 60.0).unwrap();
    let state = session.wait_for_completion(&WaitOptions::from_config(session.config())).unwrap();

    assert_eq!(state, OperationState::Complete);
    session.close();
}

#[test]
fn heartbeats_are_sent_while_waiting() {
    let scope = FakeScope::builder()
        .event_delay(Duration::from_millis(150))
        .goto_events(&["working", "complete"])
        .start();
    let session = connect(&scope);

    session.goto_target(190.9, 47.2, "M51", 10.0, 60.0).unwrap();
    let options = WaitOptions {
        poll_interval: Duration::from_millis(10),
        heartbeat_every: 2,
        timeout: Some(Duration::from_secs(5)),
    };
    assert_eq!(session.wait_for_completion(&options).unwrap(), OperationState::Complete);
    session.close();

    let saw_heartbeats = scope.wait_for_methods(Duration::from_secs(2), |methods| {
        methods.iter().filter(|m| *m == "test_connection").count() >= 2
    });
    assert!(saw_heartbeats, "expected heartbeats, got {:?}", scope.methods());
}

#[test]
fn stuck_operation_times_out_when_watchdog_is_set() {
    let scope = FakeScope::builder().goto_events(&["working"]).start();
    let session = connect_with(SessionConfig {
        completion_timeout_ms: Some(200),
        ..scope.session_config()
    });

    session.goto_target(190.9, 47.2, "M51", 10.0, 60.0).unwrap();
    let err = session
        .wait_for_completion(&WaitOptions::from_config(session.config()))
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::Timeout);
    session.close();
}

// =============================================================================
// Full per-target routine
// =============================================================================

#[test]
fn observe_target_stacks_after_successful_goto() {
    let scope = FakeScope::start();
    let session = connect(&scope);
    let request = TargetRequest::new("M51", [190.9, 47.2], 10.0, 0.05).unwrap();

    session.observe_target(&request).unwrap();
    session.close();
    assert!(scope.wait_for_methods(Duration::from_secs(2), |m| m.iter().any(|m| m == "iscope_stop_view")));

    let methods: Vec<String> = scope
        .methods()
        .into_iter()
        .filter(|m| m != "test_connection")
        .collect();
    assert_eq!(
        methods,
        [
            "set_stack_setting",
            "set_setting",
            "iscope_start_view",
            "iscope_start_stack",
            "iscope_stop_view"
        ]
    );
    assert_eq!(command(&scope, "iscope_start_stack")["params"], json!({"restart": true}));
    assert_eq!(command(&scope, "iscope_stop_view")["params"], json!({"stage": "Stack"}));
}

#[test]
fn failed_goto_skips_stacking() {
    let scope = FakeScope::builder().goto_events(&["working", "fail"]).start();
    let session = connect(&scope);
    let request = TargetRequest::new("M101", [210.8, 54.3], 10.0, 60.0).unwrap();

    let err = session.observe_target(&request).unwrap_err();
    session.close();

    assert_eq!(err.code, ErrorCode::DeviceFailure);
    assert!(!scope.methods().iter().any(|m| m == "iscope_start_stack"));
}

#[test]
fn negative_ra_uses_current_pointing() {
    let scope = FakeScope::builder().pointing(56.75, 24.12).start();
    let session = connect(&scope);
    let request = TargetRequest::new("here", [-1.0, 0.0], 10.0, 0.0).unwrap();

    session.observe_target(&request).unwrap();
    session.close();

    assert_eq!(
        command(&scope, "iscope_start_view")["params"]["target_ra_dec"],
        json!([56.75, 24.12])
    );
}

#[test]
fn current_pointing_reads_the_response() {
    let scope = FakeScope::builder().pointing(12.5, -30.25).start();
    let session = connect(&scope);

    let coords = session.current_pointing(Duration::from_secs(2)).unwrap();

    assert_eq!(coords, [12.5, -30.25]);
    session.close();
}

#[test]
fn shutdown_sends_pi_shutdown() {
    let scope = FakeScope::start();
    let session = connect(&scope);
    session.shutdown().unwrap();
    assert!(scope.wait_for_methods(Duration::from_secs(2), |m| m.iter().any(|m| m == "pi_shutdown")));
    session.close();
}
