use crate::model::RunId;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// How the target list is walked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceMode {
    /// One ordered pass.
    #[default]
    Single,
    /// Cycle until the twilight window closes.
    Repeat,
}

/// What a failed target does to the rest of the run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and move on.
    #[default]
    Continue,
    /// Stop the run at the first failed target.
    Abort,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    Aborted,
    Canceled,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Single pass done, or nothing to do.
    Finished,
    /// The clock passed dawn.
    WindowClosed,
    /// A target failed under [`FailurePolicy::Abort`].
    Aborted,
    /// The cancel flag was raised.
    Canceled,
    /// Repeat mode hit its configured pass limit.
    PassLimit,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    /// Goto and stacking finished.
    Completed,
    /// Device reported failure (or a transport error ended the target).
    Failed,
    /// Shape validation failed; the device was not contacted.
    Rejected,
    /// Unexpected instrument fault.
    Faulted,
    /// Not attempted because the run stopped first.
    Skipped,
}

impl TargetStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Rejected | Self::Faulted)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetResult {
    pub name: String,
    /// Zero-based pass through the target list.
    pub pass: u32,
    pub status: TargetStatus,
    pub attempts: u32,
    pub started_at: DateTime<FixedOffset>,
    pub ended_at: DateTime<FixedOffset>,
    pub error: Option<ErrorInfo>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SequenceReport {
    pub report_version: u32,
    pub run_id: RunId,
    pub mode: SequenceMode,
    pub status: RunStatus,
    pub stop_reason: StopReason,
    pub passes_completed: u32,
    pub started_at: DateTime<FixedOffset>,
    pub ended_at: DateTime<FixedOffset>,
    pub targets: Vec<TargetResult>,
}

impl SequenceReport {
    /// Process exit status: 0 only when the run passed.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Passed => 0,
            RunStatus::Canceled => 130,
            RunStatus::Failed | RunStatus::Aborted => 1,
        }
    }

    /// Results that were actually dispatched or rejected, in order.
    pub fn attempted(&self) -> impl Iterator<Item = &TargetResult> {
        self.targets
            .iter()
            .filter(|result| result.status != TargetStatus::Skipped)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub context: Option<serde_json::Value>,
}

pub const REPORT_VERSION: u32 = 1;
