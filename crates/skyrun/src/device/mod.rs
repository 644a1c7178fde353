//! Per-target invocation boundary between the sequencer and a device.
//!
//! The sequencer never talks to a [`DeviceSession`] directly; it hands a
//! validated [`TargetRequest`] to a [`TargetRunner`] and gets back a
//! [`DeviceStatus`]. Shape validation happens in [`run_target`] before any
//! runner is touched.

pub mod emulator;

pub use emulator::EmulatedRunner;

use crate::config::SessionConfig;
use crate::error::{ErrorCode, ScopeError};
use crate::model::{ErrorInfo, RawTarget, TargetRequest, TargetStatus};
use crate::session::DeviceSession;
use crate::transport::{Connector, TcpConnector};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of one target invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceStatus {
    Completed,
    /// The device or the link reported a failure.
    Failed { error: ErrorInfo },
    /// Unexpected instrument fault.
    Fault { error: ErrorInfo },
}

impl DeviceStatus {
    /// Classify a session result.
    pub fn from_result(result: Result<(), ScopeError>) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(err) if matches!(err.code, ErrorCode::InstrumentFault | ErrorCode::Internal) => {
                Self::Fault {
                    error: err.to_error_info(),
                }
            }
            Err(err) => Self::Failed {
                error: err.to_error_info(),
            },
        }
    }

    /// 0 for `Completed`, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Failed { .. } | Self::Fault { .. } => 1,
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Completed => None,
            Self::Failed { error } | Self::Fault { error } => Some(error),
        }
    }

    pub fn target_status(&self) -> TargetStatus {
        match self {
            Self::Completed => TargetStatus::Completed,
            Self::Failed { .. } => TargetStatus::Failed,
            Self::Fault { .. } => TargetStatus::Faulted,
        }
    }
}

/// Something that can observe one target.
pub trait TargetRunner {
    fn run_target(&mut self, request: &TargetRequest) -> DeviceStatus;
}

impl<F> TargetRunner for F
where
    F: FnMut(&TargetRequest) -> DeviceStatus,
{
    fn run_target(&mut self, request: &TargetRequest) -> DeviceStatus {
        self(request)
    }
}

/// Validate `raw`, then dispatch it. Returns the process status:
/// 1 for a rejected target (the runner is never called), otherwise the
/// runner's [`DeviceStatus::exit_code`].
pub fn run_target(runner: &mut dyn TargetRunner, raw: RawTarget) -> i32 {
    match TargetRequest::try_from(raw) {
        Ok(request) => runner.run_target(&request).exit_code(),
        Err(err) => {
            error!(error = %err, context = ?err.context, "rejected target");
            err.exit_code()
        }
    }
}

/// Runs each target on a fresh [`DeviceSession`].
pub struct SessionRunner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    shutdown_after: bool,
}

impl SessionRunner {
    pub fn new(config: SessionConfig) -> Self {
        let connector = Arc::new(TcpConnector::from_config(&config));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            shutdown_after: false,
        }
    }

    /// Power the device down after each target.
    #[must_use]
    pub fn shutdown_after(mut self, enabled: bool) -> Self {
        self.shutdown_after = enabled;
        self
    }
}

impl TargetRunner for SessionRunner {
    fn run_target(&mut self, request: &TargetRequest) -> DeviceStatus {
        let connector = Arc::clone(&self.connector);
        let session = match DeviceSession::connect_with(self.config.clone(), connector) {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, target_name = request.name(), "could not open device session");
                return DeviceStatus::from_result(Err(err));
            }
        };

        let result = session.observe_target(request);
        match &result {
            Ok(()) => info!(target_name = request.name(), "target completed"),
            Err(err) => error!(target_name = request.name(), error = %err, "target failed"),
        }

        if self.shutdown_after {
            if let Err(err) = session.shutdown() {
                warn!(error = %err, "shutdown command not delivered");
            }
        }
        if !session.close() {
            warn!("device session closed with its listener still running");
        }
        DeviceStatus::from_result(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejected_target_never_reaches_runner() {
        let mut calls = 0;
        let mut runner = |_: &TargetRequest| {
            calls += 1;
            DeviceStatus::Completed
        };
        let raw = RawTarget {
            name: json!("M51"),
            coords: json!([190.9]),
            exposure: json!(10),
            total: json!(60),
        };
        assert_eq!(run_target(&mut runner, raw), 1);
        assert_eq!(calls, 0);
    }

    #[test]
    fn status_follows_runner() {
        let mut runner = |request: &TargetRequest| {
            if request.name() == "M101" {
                DeviceStatus::from_result(Err(ScopeError::device_failure("goto failed", None)))
            } else {
                DeviceStatus::Completed
            }
        };
        let target = |name: &str| RawTarget {
            name: json!(name),
            coords: json!([210.8, 54.3]),
            exposure: json!(10),
            total: json!(60),
        };
        assert_eq!(run_target(&mut runner, target("M51")), 0);
        assert_eq!(run_target(&mut runner, target("M101")), 1);
    }

    #[test]
    fn instrument_faults_classify_as_fault() {
        let status = DeviceStatus::from_result(Err(ScopeError::instrument_fault("boom")));
        assert_eq!(status.target_status(), TargetStatus::Faulted);
        assert_eq!(status.exit_code(), 1);
        let status = DeviceStatus::from_result(Err(ScopeError::connection("send", "reset")));
        assert_eq!(status.target_status(), TargetStatus::Failed);
        assert_eq!(status.error().map(|e| e.code.as_str()), Some("E_CONNECTION"));
    }
}
