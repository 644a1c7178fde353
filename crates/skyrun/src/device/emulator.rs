//! Stand-in runner for dry runs and tests.

use super::{DeviceStatus, TargetRunner};
use crate::error::ScopeError;
use crate::model::TargetRequest;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use tracing::{info, warn};

/// Fraction of invocations that report an instrument fault by default.
pub const DEFAULT_FAULT_FRACTION: f64 = 0.1;

/// Records every invocation and reports a random instrument fault for a
/// configurable fraction of them.
pub struct EmulatedRunner {
    fault_fraction: f64,
    rng: StdRng,
    calls: Vec<TargetRequest>,
    echo: Option<Box<dyn Write + Send>>,
}

impl Default for EmulatedRunner {
    fn default() -> Self {
        Self::new(DEFAULT_FAULT_FRACTION)
    }
}

impl EmulatedRunner {
    /// `fault_fraction` is clamped to `[0, 1]`; non-finite values mean no faults.
    pub fn new(fault_fraction: f64) -> Self {
        Self::with_rng(fault_fraction, StdRng::from_entropy())
    }

    /// Deterministic variant for reproducible runs.
    pub fn seeded(fault_fraction: f64, seed: u64) -> Self {
        Self::with_rng(fault_fraction, StdRng::seed_from_u64(seed))
    }

    fn with_rng(fault_fraction: f64, rng: StdRng) -> Self {
        let fault_fraction = if fault_fraction.is_finite() {
            fault_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            fault_fraction,
            rng,
            calls: Vec::new(),
            echo: None,
        }
    }

    /// Write one line per invocation (`name [ra, dec] exposure total`) to `out`.
    #[must_use]
    pub fn echo_to(mut self, out: Box<dyn Write + Send>) -> Self {
        self.echo = Some(out);
        self
    }

    pub fn fault_fraction(&self) -> f64 {
        self.fault_fraction
    }

    /// Requests received so far, in order.
    pub fn calls(&self) -> &[TargetRequest] {
        &self.calls
    }
}

impl TargetRunner for EmulatedRunner {
    fn run_target(&mut self, request: &TargetRequest) -> DeviceStatus {
        info!(
            target_name = request.name(),
            ra = request.ra(),
            dec = request.dec(),
            exposure_secs = request.exposure_secs(),
            total_secs = request.total_secs(),
            "emulated target run"
        );
        if let Some(out) = self.echo.as_mut() {
            let line = format!(
                "{} [{}, {}] {} {}",
                request.name(),
                request.ra(),
                request.dec(),
                request.exposure_secs(),
                request.total_secs()
            );
            if let Err(err) = writeln!(out, "{line}").and_then(|()| out.flush()) {
                warn!(error = %err, "could not echo emulated invocation");
            }
        }
        self.calls.push(request.clone());

        if self.rng.gen_bool(self.fault_fraction) {
            warn!(target_name = request.name(), "emulated instrument fault");
            let err = ScopeError::instrument_fault(format!(
                "emulated instrument error on {}",
                request.name()
            ));
            return DeviceStatus::Fault {
                error: err.to_error_info(),
            };
        }
        DeviceStatus::Completed
    }
}
