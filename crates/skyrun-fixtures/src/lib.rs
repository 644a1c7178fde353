//! Test utilities and fixtures for skyrun integration tests.
//!
//! - [`FakeScope`] - scriptable TCP telescope speaking the CRLF JSON protocol
//! - [`ManualClock`] - a [`skyrun::twilight::Clock`] whose sleeps advance time
//! - [`temp_dir`] / [`write_schedule`] - scratch files for CLI tests
//!
//! # Example
//!
//! ```ignore
//! use skyrun::session::DeviceSession;
//! use skyrun_fixtures::FakeScope;
//!
//! let scope = FakeScope::builder().goto_events(&["working", "complete"]).start();
//! let session = DeviceSession::connect(scope.session_config()).unwrap();
//! ```

// Test fixtures crate - relaxed lints for test utilities
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod clock;
pub mod fake_scope;
pub mod helpers;

pub use clock::ManualClock;
pub use fake_scope::{FakeScope, FakeScopeBuilder};
pub use helpers::{temp_dir, write_schedule};
