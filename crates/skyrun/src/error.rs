//! Structured errors shared by every layer of the crate.
//!
//! All fallible operations return [`ScopeError`]: a stable machine-readable
//! [`ErrorCode`], a human message and optional JSON context. The code
//! decides both how the sequencer classifies a failure and which exit code
//! the CLI reports.

use crate::model::ErrorInfo;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Result alias used throughout the crate.
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Stable error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Local I/O (files, logs).
    #[serde(rename = "E_IO")]
    Io,
    /// Socket failure that survived the reconnect-and-retry.
    #[serde(rename = "E_CONNECTION")]
    Connection,
    /// Unparseable or unexpected frame.
    #[serde(rename = "E_PROTOCOL")]
    Protocol,
    /// Bad argument shape, rejected before any device contact.
    #[serde(rename = "E_VALIDATION")]
    Validation,
    /// The device reported the operation as failed.
    #[serde(rename = "E_DEVICE_FAILURE")]
    DeviceFailure,
    /// Unexpected instrument fault (real or emulated).
    #[serde(rename = "E_INSTRUMENT_FAULT")]
    InstrumentFault,
    /// A bounded wait expired.
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    /// Invalid configuration or schedule file.
    #[serde(rename = "E_CONFIG")]
    Config,
    /// The run was canceled by the operator.
    #[serde(rename = "E_CANCELED")]
    Canceled,
    /// Poisoned lock or similar internal fault.
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// Wire/string form, e.g. `E_CONNECTION`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Io => "E_IO",
            Self::Connection => "E_CONNECTION",
            Self::Protocol => "E_PROTOCOL",
            Self::Validation => "E_VALIDATION",
            Self::DeviceFailure => "E_DEVICE_FAILURE",
            Self::InstrumentFault => "E_INSTRUMENT_FAULT",
            Self::Timeout => "E_TIMEOUT",
            Self::Config => "E_CONFIG",
            Self::Canceled => "E_CANCELED",
            Self::Internal => "E_INTERNAL",
        }
    }

    /// Parse the string form back into a code.
    pub fn parse(code: &str) -> Option<Self> {
        let parsed = match code {
            "E_IO" => Self::Io,
            "E_CONNECTION" => Self::Connection,
            "E_PROTOCOL" => Self::Protocol,
            "E_VALIDATION" => Self::Validation,
            "E_DEVICE_FAILURE" => Self::DeviceFailure,
            "E_INSTRUMENT_FAULT" => Self::InstrumentFault,
            "E_TIMEOUT" => Self::Timeout,
            "E_CONFIG" => Self::Config,
            "E_CANCELED" => Self::Canceled,
            "E_INTERNAL" => Self::Internal,
            _ => return None,
        };
        Some(parsed)
    }

    /// Process exit code for this error class.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Validation | Self::DeviceFailure | Self::InstrumentFault => 1,
            Self::Config => 2,
            Self::Connection | Self::Io => 3,
            Self::Timeout => 4,
            Self::Protocol => 5,
            Self::Canceled => 130,
            Self::Internal => 70,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by the session, transport, codec or sequencer.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ScopeError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<Value>,
}

impl ScopeError {
    pub fn new(code: ErrorCode, message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn io(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Io,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    /// Fatal socket error: the single reconnect-and-retry did not help.
    pub fn connection(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Connection,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn protocol(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Protocol, message, context)
    }

    pub fn validation(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Validation, message, context)
    }

    pub fn device_failure(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::DeviceFailure, message, context)
    }

    pub fn instrument_fault(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InstrumentFault, message, None)
    }

    pub fn timeout(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Timeout, message, context)
    }

    pub fn config(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Config,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Canceled, message, None)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message, None)
    }

    /// Lock poisoning helper; the guarded data is never left half-written.
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::internal(format!("{what} lock poisoned"))
    }

    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }
}

impl Diagnostic for ScopeError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let hint = match self.code {
            ErrorCode::Connection => "check that the telescope is powered on and reachable on the configured host/port",
            ErrorCode::Validation => "targets need a text name, a [ra, dec] number pair, and numeric exposure/total times",
            ErrorCode::Config => "see the example schedule in README.md",
            _ => return None,
        };
        Some(Box::new(hint))
    }
}
