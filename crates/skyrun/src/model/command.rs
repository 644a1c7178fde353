use crate::model::OperationState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Method names understood by the device.
pub mod methods {
    /// No-op liveness probe.
    pub const TEST_CONNECTION: &str = "test_connection";
    /// Query current equatorial pointing.
    pub const SCOPE_GET_EQU_COORD: &str = "scope_get_equ_coord";
    /// Exposure configuration.
    pub const SET_SETTING: &str = "set_setting";
    /// Slew to a target and start viewing.
    pub const ISCOPE_START_VIEW: &str = "iscope_start_view";
    /// Start stacking on the current view.
    pub const ISCOPE_START_STACK: &str = "iscope_start_stack";
    /// Stop a view stage (stacking).
    pub const ISCOPE_STOP_VIEW: &str = "iscope_stop_view";
    /// Stacking options.
    pub const SET_STACK_SETTING: &str = "set_stack_setting";
    /// Power the device down.
    pub const PI_SHUTDOWN: &str = "pi_shutdown";
}

/// Event name carrying goto lifecycle progress.
pub const AUTO_GOTO_EVENT: &str = "AutoGoto";

/// Outbound command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Classification of an inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind<'a> {
    /// Unsolicited event, named by its `Event` field.
    Event(&'a str),
    /// Response to a command, named by its `method` field.
    Response(&'a str),
    /// Neither field present.
    Other,
}

/// One decoded JSON object received from the device.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame(Map<String, Value>);

impl Frame {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn kind(&self) -> FrameKind<'_> {
        if let Some(event) = self.0.get("Event").and_then(Value::as_str) {
            return FrameKind::Event(event);
        }
        match self.method() {
            Some(method) => FrameKind::Response(method),
            None => FrameKind::Other,
        }
    }

    pub fn method(&self) -> Option<&str> {
        self.0.get("method").and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<u64> {
        self.0.get("id").and_then(Value::as_u64)
    }

    pub fn result(&self) -> Option<&Value> {
        self.0.get("result")
    }

    /// Raw `state` string of a lifecycle event.
    pub fn state(&self) -> Option<&str> {
        self.0.get("state").and_then(Value::as_str)
    }

    /// Terminal goto state carried by an `AutoGoto` event, if any.
    ///
    /// Only `complete` and `fail` count; intermediate states such as
    /// `start` or `working` return `None`.
    pub fn goto_outcome(&self) -> Option<OperationState> {
        if self.kind() != FrameKind::Event(AUTO_GOTO_EVENT) {
            return None;
        }
        self.state()
            .and_then(OperationState::parse)
            .filter(|state| state.is_terminal())
    }
}
