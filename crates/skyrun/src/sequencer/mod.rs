//! Target sequencer: walks the schedule inside the twilight window.
//!
//! For each target the sequencer
//!
//! 1. checks the twilight gate (waiting for dusk, stopping after dawn),
//! 2. validates the entry into a [`TargetRequest`],
//! 3. runs it on the [`TargetRunner`] up to `1 + retries` times,
//! 4. sleeps the entry's `pause`.
//!
//! `single` mode makes one pass; `repeat` mode keeps cycling until the
//! window closes, the pass limit is hit, or the cancel flag is raised.
//! Failures are recorded per target and, under [`FailurePolicy::Continue`],
//! never stop the run.

pub mod progress;

pub use progress::{CollectingProgress, NoopProgress, ProgressCallback, SequenceEvent};

use crate::device::{DeviceStatus, TargetRunner};
use crate::error::ScopeResult;
use crate::model::{
    FailurePolicy, RunId, RunStatus, SequenceMode, SequenceReport, StopReason, Target,
    TargetRequest, TargetResult, TargetStatus, REPORT_VERSION,
};
use crate::twilight::{Clock, TwilightSource, TwilightWindow, WindowPhase};
use chrono::{DateTime, FixedOffset};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Default period between clock checks while waiting for dusk.
pub const DEFAULT_WINDOW_POLL: Duration = Duration::from_secs(60);

/// Whether the twilight gate is consulted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GateMode {
    #[default]
    Enforce,
    /// Test mode: dispatch regardless of the time of night.
    Bypass,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequencerOptions {
    pub mode: SequenceMode,
    pub failure_policy: FailurePolicy,
    pub gate: GateMode,
    pub window_poll: Duration,
    /// Repeat mode only: stop after this many full passes.
    pub max_passes: Option<u32>,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            mode: SequenceMode::Single,
            failure_policy: FailurePolicy::Continue,
            gate: GateMode::Enforce,
            window_poll: DEFAULT_WINDOW_POLL,
            max_passes: None,
        }
    }
}

/// Verdict of the gate before a target.
enum Gate {
    Open,
    Closed,
    Canceled,
}

pub struct Sequencer {
    options: SequencerOptions,
    clock: Arc<dyn Clock>,
    twilight: Arc<dyn TwilightSource>,
    cancel: Arc<AtomicBool>,
    progress: Box<dyn ProgressCallback>,
}

impl Sequencer {
    pub fn new(
        options: SequencerOptions,
        clock: Arc<dyn Clock>,
        twilight: Arc<dyn TwilightSource>,
    ) -> Self {
        Self {
            options,
            clock,
            twilight,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: Box::new(NoopProgress),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Box<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Share an external cancel flag (e.g. wired to Ctrl-C).
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn options(&self) -> &SequencerOptions {
        &self.options
    }

    /// Run the whole schedule and report per-target outcomes.
    pub fn run(
        &self,
        targets: &[Target],
        runner: &mut dyn TargetRunner,
    ) -> ScopeResult<SequenceReport> {
        let run_id = RunId::new();
        let started_at = self.clock.now();
        info!(%run_id, mode = ?self.options.mode, targets = targets.len(), "sequence started");
        self.progress.on_progress(&SequenceEvent::RunStarted {
            run_id,
            mode: self.options.mode,
            total_targets: targets.len(),
        });

        let window = match self.options.gate {
            GateMode::Enforce => {
                let window = self.twilight.window_for(started_at)?;
                info!(dusk = %window.dusk, dawn = %window.dawn, "twilight window");
                Some(window)
            }
            GateMode::Bypass => {
                warn!("twilight gate bypassed");
                None
            }
        };

        let mut results = Vec::new();
        let (stop_reason, passes_completed) =
            self.run_passes(targets, window.as_ref(), runner, &mut results);
        let status = run_status(stop_reason, &results);

        info!(%run_id, ?status, ?stop_reason, passes_completed, "sequence finished");
        self.progress.on_progress(&SequenceEvent::RunCompleted {
            run_id,
            status: status.clone(),
            stop_reason,
        });
        Ok(SequenceReport {
            report_version: REPORT_VERSION,
            run_id,
            mode: self.options.mode,
            status,
            stop_reason,
            passes_completed,
            started_at,
            ended_at: self.clock.now(),
            targets: results,
        })
    }

    fn run_passes(
        &self,
        targets: &[Target],
        window: Option<&TwilightWindow>,
        runner: &mut dyn TargetRunner,
        results: &mut Vec<TargetResult>,
    ) -> (StopReason, u32) {
        if targets.is_empty() {
            info!("no targets scheduled");
            return (StopReason::Finished, 0);
        }

        let mut pass: u32 = 0;
        loop {
            let pass_start = results.len();
            if let Some(reason) = self.run_pass(targets, pass, window, runner, results) {
                return (reason, pass);
            }
            let completed_any = results
                .get(pass_start..)
                .unwrap_or_default()
                .iter()
                .any(|result| result.status == TargetStatus::Completed);
            pass = pass.saturating_add(1);
            if self.is_canceled() {
                return (StopReason::Canceled, pass);
            }
            match self.options.mode {
                SequenceMode::Single => return (StopReason::Finished, pass),
                SequenceMode::Repeat => {
                    if self.options.max_passes.is_some_and(|limit| pass >= limit) {
                        info!(passes = pass, "pass limit reached");
                        return (StopReason::PassLimit, pass);
                    }
                    if !completed_any {
                        // Nothing succeeded; back off before cycling.
                        warn!(
                            pass,
                            backoff_s = self.options.window_poll.as_secs(),
                            "no target completed in this pass; backing off"
                        );
                        self.clock.sleep(self.options.window_poll);
                    }
                    info!(pass, "starting next pass");
                }
            }
        }
    }

    /// One ordered pass. Returns a stop reason when the run must end early.
    fn run_pass(
        &self,
        targets: &[Target],
        pass: u32,
        window: Option<&TwilightWindow>,
        runner: &mut dyn TargetRunner,
        results: &mut Vec<TargetResult>,
    ) -> Option<StopReason> {
        for (index, target) in targets.iter().enumerate() {
            let early_stop = match self.await_window(window) {
                Gate::Open => None,
                Gate::Closed => Some(StopReason::WindowClosed),
                Gate::Canceled => Some(StopReason::Canceled),
            };
            if let Some(reason) = early_stop {
                self.skip_remaining(targets.get(index..).unwrap_or_default(), pass, results);
                return Some(reason);
            }

            let result = self.run_one(target, pass, index, targets.len(), runner);
            let failed = result.status.is_failure();
            results.push(result);

            if failed && self.options.failure_policy == FailurePolicy::Abort {
                error!(target_name = %target.label(), "target failed; aborting sequence");
                self.skip_remaining(targets.get(index + 1..).unwrap_or_default(), pass, results);
                return Some(StopReason::Aborted);
            }
            self.pause_after(target);
        }
        None
    }

    /// Block until the gate opens. Polls the clock once per `window_poll`.
    fn await_window(&self, window: Option<&TwilightWindow>) -> Gate {
        loop {
            if self.is_canceled() {
                return Gate::Canceled;
            }
            let Some(window) = window else {
                return Gate::Open;
            };
            let now = self.clock.now();
            match window.phase(now) {
                WindowPhase::Open => return Gate::Open,
                WindowPhase::AfterDawn => {
                    info!(%now, dawn = %window.dawn, "twilight window closed");
                    return Gate::Closed;
                }
                WindowPhase::BeforeDusk => {
                    info!(%now, dusk = %window.dusk, "waiting for twilight window");
                    self.progress
                        .on_progress(&SequenceEvent::WaitingForWindow { dusk: window.dusk });
                    self.clock.sleep(self.options.window_poll);
                }
            }
        }
    }

    fn run_one(
        &self,
        target: &Target,
        pass: u32,
        index: usize,
        total_targets: usize,
        runner: &mut dyn TargetRunner,
    ) -> TargetResult {
        let name = target.label();
        let started_at = self.clock.now();
        self.progress.on_progress(&SequenceEvent::TargetStarted {
            name: name.clone(),
            pass,
            index: index + 1,
            total_targets,
        });

        let (status, attempts, error) = match TargetRequest::try_from(target.to_raw()) {
            Ok(request) => {
                let (outcome, attempts) = self.attempt(target, &request, runner);
                (outcome.target_status(), attempts, outcome.error().cloned())
            }
            Err(err) => {
                error!(target_name = %name, error = %err, context = ?err.context, "rejected target");
                (TargetStatus::Rejected, 0, Some(err.to_error_info()))
            }
        };

        let ended_at = self.clock.now();
        self.progress.on_progress(&SequenceEvent::TargetCompleted {
            name: name.clone(),
            pass,
            status: status.clone(),
            attempts,
            duration_ms: elapsed_ms(started_at, ended_at),
        });
        TargetResult {
            name,
            pass,
            status,
            attempts,
            started_at,
            ended_at,
            error,
        }
    }

    /// Up to `1 + retries` runs, `retry_wait` apart.
    fn attempt(
        &self,
        target: &Target,
        request: &TargetRequest,
        runner: &mut dyn TargetRunner,
    ) -> (DeviceStatus, u32) {
        let allowed = target.retries.saturating_add(1);
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let outcome = runner.run_target(request);
            match &outcome {
                DeviceStatus::Completed => {
                    info!(target_name = request.name(), attempts, "target completed");
                    return (outcome, attempts);
                }
                DeviceStatus::Failed { error } | DeviceStatus::Fault { error } => {
                    warn!(
                        target_name = request.name(),
                        attempts,
                        code = %error.code,
                        message = %error.message,
                        "target attempt failed"
                    );
                }
            }
            if attempts >= allowed || self.is_canceled() {
                return (outcome, attempts);
            }
            self.clock.sleep(secs(target.retry_wait));
        }
    }

    fn pause_after(&self, target: &Target) {
        let pause = secs(target.pause);
        if !pause.is_zero() && !self.is_canceled() {
            info!(seconds = target.pause, "pausing before next target");
            self.clock.sleep(pause);
        }
    }

    fn skip_remaining(&self, targets: &[Target], pass: u32, results: &mut Vec<TargetResult>) {
        let now = self.clock.now();
        for target in targets {
            warn!(target_name = %target.label(), "target skipped");
            results.push(TargetResult {
                name: target.label(),
                pass,
                status: TargetStatus::Skipped,
                attempts: 0,
                started_at: now,
                ended_at: now,
                error: None,
            });
        }
    }

    fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

fn run_status(stop_reason: StopReason, results: &[TargetResult]) -> RunStatus {
    match stop_reason {
        StopReason::Canceled => RunStatus::Canceled,
        StopReason::Aborted => RunStatus::Aborted,
        _ if results.iter().any(|result| result.status.is_failure()) => RunStatus::Failed,
        _ => RunStatus::Passed,
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn elapsed_ms(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}
