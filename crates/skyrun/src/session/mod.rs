//! Device session: the command side of the telescope link.
//!
//! A [`DeviceSession`] owns the [`Transport`], the [`CommandCodec`] and the
//! background [`EventListener`]. Commands are fire-and-forget; the only
//! blocking operation is [`DeviceSession::wait_for_completion`], which
//! polls the shared [`OperationCell`] and sends a heartbeat every few polls
//! until the listener reports a terminal goto state.
//!
//! # Operation state machine
//!
//! ```text
//! idle|complete|fail --goto_target/start_stack--> working
//! working --AutoGoto complete|fail (listener)--> complete|fail
//! ```
//!
//! # Example
//!
//! ```no_run
//! use skyrun::config::SessionConfig;
//! use skyrun::model::OperationState;
//! use skyrun::session::{DeviceSession, WaitOptions};
//!
//! # fn example() -> skyrun::ScopeResult<()> {
//! let session = DeviceSession::connect(SessionConfig::for_address("192.168.1.40", 4700))?;
//! session.goto_target(202.47, 47.2, "M51", 10.0, 60.0)?;
//! if session.wait_for_completion(&WaitOptions::default())? == OperationState::Complete {
//!     session.start_stack()?;
//!     session.stack_for(std::time::Duration::from_secs(600))?;
//!     session.stop_stack()?;
//! }
//! session.close();
//! # Ok(())
//! # }
//! ```

pub mod operation;

use crate::codec::CommandCodec;
use crate::config::SessionConfig;
use crate::error::{ScopeError, ScopeResult};
use crate::listener::{EventListener, ListenerOptions};
use crate::model::{methods, OperationState, TargetRequest};
use crate::transport::{Connector, TcpConnector, Transport};
use operation::{OperationCell, ResponseBoard};
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long `current_pointing` waits for the device's answer.
const POINTING_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Polling parameters of [`DeviceSession::wait_for_completion`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// Heartbeat every N polls.
    pub heartbeat_every: u32,
    /// Watchdog; `None` waits until the device reports a terminal state.
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            heartbeat_every: 5,
            timeout: None,
        }
    }
}

impl WaitOptions {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            heartbeat_every: config.heartbeat_every.max(1),
            timeout: config.completion_timeout(),
        }
    }
}

/// Live session with one device.
pub struct DeviceSession {
    config: SessionConfig,
    transport: Arc<Transport>,
    codec: CommandCodec,
    operation: Arc<OperationCell>,
    responses: Arc<ResponseBoard>,
    listener: Option<EventListener>,
}

impl DeviceSession {
    /// Connect over TCP to `config.host:config.port`.
    pub fn connect(config: SessionConfig) -> ScopeResult<Self> {
        let connector = Arc::new(TcpConnector::from_config(&config));
        Self::connect_with(config, connector)
    }

    /// Connect through an arbitrary [`Connector`], start the listener and
    /// apply the stacking settings.
    pub fn connect_with(config: SessionConfig, connector: Arc<dyn Connector>) -> ScopeResult<Self> {
        config.validate()?;
        let transport = Arc::new(Transport::connect(connector)?);
        let operation = Arc::new(OperationCell::new());
        let responses = Arc::new(ResponseBoard::new());
        let listener = EventListener::spawn(
            Arc::clone(&transport),
            Arc::clone(&operation),
            Arc::clone(&responses),
            ListenerOptions::from_config(&config),
        )?;
        let session = Self {
            codec: CommandCodec::new(config.command_id_base),
            config,
            transport,
            operation,
            responses,
            listener: Some(listener),
        };
        session.set_stack_settings(session.config.save_discrete_frames)?;
        Ok(session)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn operation_state(&self) -> ScopeResult<OperationState> {
        self.operation.get()
    }

    /// Encode and send one command; returns its id.
    pub fn send_command(&self, method: &str, params: Option<Value>) -> ScopeResult<u64> {
        let command = self.codec.encode(method, params)?;
        if self.config.debug {
            let line = String::from_utf8_lossy(&command.bytes);
            debug!(id = command.id(), method, line = %line.trim_end(), "sending command");
        } else {
            debug!(id = command.id(), method, "sending command");
        }
        self.transport.send(&command.bytes)?;
        Ok(command.id())
    }

    /// Liveness probe.
    pub fn heartbeat(&self) -> ScopeResult<()> {
        self.send_command(methods::TEST_CONNECTION, None).map(|_| ())
    }

    pub fn set_stack_settings(&self, save_discrete_frame: bool) -> ScopeResult<()> {
        debug!(save_discrete_frame, "applying stack settings");
        self.send_command(
            methods::SET_STACK_SETTING,
            Some(json!({ "save_discrete_frame": save_discrete_frame })),
        )
        .map(|_| ())
    }

    /// Set sub-exposure and continuous-preview exposure. Fire-and-forget.
    pub fn configure_exposure(&self, sub_exposure_secs: f64, continuous_secs: f64) -> ScopeResult<()> {
        let params = json!({
            "exp_ms": {
                "stack_l": secs_to_ms(sub_exposure_secs),
                "continous": secs_to_ms(continuous_secs),
            }
        });
        debug!(%params, "exposure settings");
        self.send_command(methods::SET_SETTING, Some(params)).map(|_| ())
    }

    /// Configure exposure, then slew to `(ra, dec)`. Does not block.
    ///
    /// The operation state enters `working` before the slew command is
    /// sent, so a fast terminal event cannot be lost.
    pub fn goto_target(
        &self,
        ra: f64,
        dec: f64,
        name: &str,
        exposure_secs: f64,
        continuous_secs: f64,
    ) -> ScopeResult<()> {
        self.configure_exposure(exposure_secs, continuous_secs)?;
        info!(target_name = name, ra, dec, "going to target");
        self.operation.begin()?;
        self.send_command(
            methods::ISCOPE_START_VIEW,
            Some(json!({
                "mode": "star",
                "target_ra_dec": [ra, dec],
                "target_name": name,
                "lp_filter": u8::from(self.config.lp_filter),
            })),
        )
        .map(|_| ())
    }

    /// Block until the operation leaves `working`, heartbeating every
    /// `heartbeat_every` polls. Returns the terminal state.
    pub fn wait_for_completion(&self, options: &WaitOptions) -> ScopeResult<OperationState> {
        let state = self.operation.begin_if_idle()?;
        if state != OperationState::Working {
            return Ok(state);
        }

        let heartbeat_every = options.heartbeat_every.max(1);
        let started = Instant::now();
        let mut polls: u32 = 0;
        loop {
            let state = self.operation.wait_while_working(options.poll_interval)?;
            if state != OperationState::Working {
                debug!(%state, polls, "operation finished");
                return Ok(state);
            }
            polls = polls.wrapping_add(1);
            if polls % heartbeat_every == 0 {
                self.heartbeat()?;
            }
            if let Some(limit) = options.timeout {
                if started.elapsed() >= limit {
                    return Err(ScopeError::timeout(
                        "device did not finish the operation in time",
                        json!({
                            "timeout_ms": u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                            "polls": polls,
                        }),
                    ));
                }
            }
        }
    }

    pub fn start_stack(&self) -> ScopeResult<()> {
        info!("starting to stack");
        self.operation.begin()?;
        self.send_command(methods::ISCOPE_START_STACK, Some(json!({ "restart": true })))
            .map(|_| ())
    }

    pub fn stop_stack(&self) -> ScopeResult<()> {
        info!("stopping stack");
        self.send_command(methods::ISCOPE_STOP_VIEW, Some(json!({ "stage": "Stack" })))
            .map(|_| ())
    }

    /// Keep the link alive for `duration` while the device integrates.
    pub fn stack_for(&self, duration: Duration) -> ScopeResult<()> {
        let tick = self.config.poll_interval();
        let heartbeat_every = self.config.heartbeat_every.max(1);
        let started = Instant::now();
        let mut ticks: u32 = 0;
        loop {
            let remaining = duration.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Ok(());
            }
            thread::sleep(remaining.min(tick));
            ticks = ticks.wrapping_add(1);
            if ticks % heartbeat_every == 0 {
                self.heartbeat()?;
            }
        }
    }

    /// Ask the device where it points; returns `[ra, dec]`.
    pub fn current_pointing(&self, timeout: Duration) -> ScopeResult<[f64; 2]> {
        self.responses.clear(methods::SCOPE_GET_EQU_COORD)?;
        self.send_command(methods::SCOPE_GET_EQU_COORD, None)?;
        let frame = self
            .responses
            .wait_for(methods::SCOPE_GET_EQU_COORD, timeout)?
            .ok_or_else(|| ScopeError::timeout("no reply to scope_get_equ_coord", None))?;
        let coords = frame.result().and_then(|result| {
            let ra = result.get("ra").and_then(Value::as_f64)?;
            let dec = result.get("dec").and_then(Value::as_f64)?;
            Some([ra, dec])
        });
        coords.ok_or_else(|| {
            ScopeError::protocol(
                "scope_get_equ_coord reply lacks numeric ra/dec",
                frame.into_value(),
            )
        })
    }

    /// Power the device down. Fire-and-forget.
    pub fn shutdown(&self) -> ScopeResult<()> {
        warn!("sending shutdown to device");
        self.send_command(methods::PI_SHUTDOWN, None).map(|_| ())
    }

    /// Full per-target routine: goto, wait, settle, stack for the total
    /// time, stop. A negative RA means "stay at the current pointing".
    pub fn observe_target(&self, request: &TargetRequest) -> ScopeResult<()> {
        let request = if request.ra() < 0.0 {
            let coords = self.current_pointing(POINTING_QUERY_TIMEOUT)?;
            info!(ra = coords[0], dec = coords[1], "using current pointing");
            request.clone().with_coords(coords)
        } else {
            request.clone()
        };
        info!(
            target_name = request.name(),
            ra = request.ra(),
            dec = request.dec(),
            exposure_secs = request.exposure_secs(),
            total_secs = request.total_secs(),
            "observing target"
        );

        self.goto_target(
            request.ra(),
            request.dec(),
            request.name(),
            request.exposure_secs(),
            self.config.continuous_exposure_secs,
        )?;
        let outcome = self.wait_for_completion(&WaitOptions::from_config(&self.config))?;
        info!(target_name = request.name(), %outcome, "goto operation finished");

        if outcome != OperationState::Complete {
            return Err(ScopeError::device_failure(
                format!("goto to {} failed", request.name()),
                json!({ "target": request.name(), "state": outcome }),
            ));
        }

        thread::sleep(self.config.settle_delay());
        self.start_stack()?;
        let total = Duration::try_from_secs_f64(request.total_secs()).unwrap_or(Duration::ZERO);
        self.stack_for(total)?;
        self.stop_stack()?;
        info!(target_name = request.name(), "stacking operation finished");
        Ok(())
    }

    /// Stop the listener (bounded join) and drop the link.
    ///
    /// Returns `false` when the listener had to be abandoned.
    pub fn close(mut self) -> bool {
        let timeout = self.config.listener_join_timeout();
        self.listener
            .take()
            .map_or(true, |listener| listener.stop(timeout))
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        // Dropping the handle clears the run flag; the thread exits on its own.
        drop(self.listener.take());
    }
}

/// Seconds to whole milliseconds, as the device expects.
fn secs_to_ms(secs: f64) -> u64 {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    // Bounded above by the clamp; sign checked above.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let millis = (secs * 1000.0).round().min(9.0e15) as u64;
    millis
}
