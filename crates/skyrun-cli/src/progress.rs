//! Verbose progress output using indicatif.

use indicatif::{ProgressBar, ProgressStyle};
use skyrun::sequencer::{ProgressCallback, SequenceEvent};
use skyrun::{RunStatus, TargetStatus};
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

/// Progress callback that reports target-by-target progress on stderr.
pub struct VerboseProgress {
    spinner: Mutex<Option<ProgressBar>>,
}

impl VerboseProgress {
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }

    fn replace_spinner(&self, next: Option<ProgressBar>) {
        if let Ok(mut spinner) = self.spinner.lock() {
            if let Some(pb) = spinner.take() {
                pb.finish_and_clear();
            }
            *spinner = next;
        }
    }
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

impl ProgressCallback for VerboseProgress {
    fn on_progress(&self, event: &SequenceEvent) {
        match event {
            SequenceEvent::RunStarted {
                run_id,
                mode,
                total_targets,
            } => {
                let _ = writeln!(
                    std::io::stderr(),
                    "sequence started: {run_id} ({total_targets} targets, {mode:?} mode)"
                );
            }
            SequenceEvent::WaitingForWindow { dusk } => {
                let waiting = self
                    .spinner
                    .lock()
                    .map(|s| s.is_some())
                    .unwrap_or(false);
                if !waiting {
                    self.replace_spinner(Some(spinner(format!("waiting for dusk at {dusk}"))));
                }
            }
            SequenceEvent::TargetStarted {
                name,
                pass,
                index,
                total_targets,
            } => {
                self.replace_spinner(Some(spinner(format!(
                    "[{index}/{total_targets}] pass {pass}: {name}"
                ))));
            }
            SequenceEvent::TargetCompleted {
                name,
                pass: _,
                status,
                attempts,
                duration_ms,
            } => {
                self.replace_spinner(None);
                let status_icon = match status {
                    TargetStatus::Completed => "\x1b[32m✓\x1b[0m",
                    TargetStatus::Failed | TargetStatus::Faulted => "\x1b[31m✗\x1b[0m",
                    TargetStatus::Rejected => "\x1b[31m!\x1b[0m",
                    TargetStatus::Skipped => "\x1b[33m-\x1b[0m",
                };
                let _ = writeln!(
                    std::io::stderr(),
                    "  {status_icon} {name} ({attempts} attempts, {duration_ms}ms)"
                );
            }
            SequenceEvent::RunCompleted {
                run_id: _,
                status,
                stop_reason,
            } => {
                self.replace_spinner(None);
                let status_msg = match status {
                    RunStatus::Passed => "\x1b[32mpassed\x1b[0m",
                    RunStatus::Failed | RunStatus::Aborted => "\x1b[31mfailed\x1b[0m",
                    RunStatus::Canceled => "\x1b[33mcanceled\x1b[0m",
                };
                let _ = writeln!(std::io::stderr(), "sequence {status_msg}: {stop_reason:?}");
            }
        }
    }
}
