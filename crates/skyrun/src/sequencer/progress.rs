//! Progress callback for reporting sequencer progress.

use crate::model::{RunId, RunStatus, SequenceMode, StopReason, TargetStatus};
use chrono::{DateTime, FixedOffset};

/// Event emitted while a sequence runs.
#[derive(Debug, Clone)]
pub enum SequenceEvent {
    RunStarted {
        run_id: RunId,
        mode: SequenceMode,
        total_targets: usize,
    },
    /// The gate is closed until dusk; emitted once per poll.
    WaitingForWindow {
        dusk: DateTime<FixedOffset>,
    },
    TargetStarted {
        name: String,
        pass: u32,
        /// 1-based position in the list.
        index: usize,
        total_targets: usize,
    },
    TargetCompleted {
        name: String,
        pass: u32,
        status: TargetStatus,
        attempts: u32,
        duration_ms: u64,
    },
    RunCompleted {
        run_id: RunId,
        status: RunStatus,
        stop_reason: StopReason,
    },
}

/// Receives [`SequenceEvent`]s.
pub trait ProgressCallback: Send {
    fn on_progress(&self, event: &SequenceEvent);
}

/// Discards every event.
pub struct NoopProgress;

impl ProgressCallback for NoopProgress {
    fn on_progress(&self, _event: &SequenceEvent) {}
}

/// Collects events; used by tests.
#[derive(Default)]
pub struct CollectingProgress {
    events: std::sync::Mutex<Vec<SequenceEvent>>,
}

impl CollectingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events seen so far.
    pub fn events(&self) -> Vec<SequenceEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressCallback for CollectingProgress {
    fn on_progress(&self, event: &SequenceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

impl<T: ProgressCallback + Sync> ProgressCallback for std::sync::Arc<T> {
    fn on_progress(&self, event: &SequenceEvent) {
        (**self).on_progress(event);
    }
}
