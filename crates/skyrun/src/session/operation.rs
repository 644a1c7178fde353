//! State shared between the session thread and the event listener.

use crate::error::{ScopeError, ScopeResult};
use crate::model::{Frame, OperationState};
use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Concurrency-safe cell holding the in-flight [`OperationState`].
///
/// Written by the listener on terminal events and by the session when an
/// operation starts; waiters are woken on every change.
#[derive(Debug, Default)]
pub struct OperationCell {
    state: Mutex<OperationState>,
    changed: Condvar,
}

impl OperationCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ScopeResult<OperationState> {
        self.state
            .lock()
            .map(|state| *state)
            .map_err(|_| ScopeError::poisoned("operation state"))
    }

    /// Store `next` and return the previous state.
    pub fn set(&self, next: OperationState) -> ScopeResult<OperationState> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ScopeError::poisoned("operation state"))?;
        let previous = std::mem::replace(&mut *state, next);
        self.changed.notify_all();
        Ok(previous)
    }

    /// Mark a new operation as started, discarding the previous outcome.
    pub fn begin(&self) -> ScopeResult<()> {
        self.set(OperationState::Working).map(|_| ())
    }

    /// Enter `working` only from `idle`; a terminal state that already
    /// arrived for the current operation is kept.
    pub fn begin_if_idle(&self) -> ScopeResult<OperationState> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ScopeError::poisoned("operation state"))?;
        if *state == OperationState::Idle {
            *state = OperationState::Working;
        }
        Ok(*state)
    }

    /// Block up to `timeout` while the state is `working`; returns the state seen last.
    pub fn wait_while_working(&self, timeout: Duration) -> ScopeResult<OperationState> {
        let state = self
            .state
            .lock()
            .map_err(|_| ScopeError::poisoned("operation state"))?;
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |state| *state == OperationState::Working)
            .map_err(|_| ScopeError::poisoned("operation state"))?;
        Ok(*state)
    }
}

/// Latest response frame per method, filled by the listener.
#[derive(Debug, Default)]
pub struct ResponseBoard {
    latest: Mutex<HashMap<String, Frame>>,
    arrived: Condvar,
}

impl ResponseBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, method: &str, frame: Frame) -> ScopeResult<()> {
        let mut latest = self
            .latest
            .lock()
            .map_err(|_| ScopeError::poisoned("response board"))?;
        latest.insert(method.to_string(), frame);
        self.arrived.notify_all();
        Ok(())
    }

    /// Forget any stored response for `method`.
    pub fn clear(&self, method: &str) -> ScopeResult<()> {
        self.latest
            .lock()
            .map_err(|_| ScopeError::poisoned("response board"))?
            .remove(method);
        Ok(())
    }

    /// Wait up to `timeout` for a response to `method` and take it.
    pub fn wait_for(&self, method: &str, timeout: Duration) -> ScopeResult<Option<Frame>> {
        let deadline = Instant::now() + timeout;
        let mut latest = self
            .latest
            .lock()
            .map_err(|_| ScopeError::poisoned("response board"))?;
        loop {
            if let Some(frame) = latest.remove(method) {
                return Ok(Some(frame));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            latest = self
                .arrived
                .wait_timeout(latest, remaining)
                .map_err(|_| ScopeError::poisoned("response board"))?
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn begin_if_idle_keeps_early_terminal_state() {
        let cell = OperationCell::new();
        assert_eq!(cell.begin_if_idle().ok(), Some(OperationState::Working));
        assert!(cell.set(OperationState::Complete).is_ok());
        assert_eq!(cell.begin_if_idle().ok(), Some(OperationState::Complete));
        assert!(cell.begin().is_ok());
        assert_eq!(cell.get().ok(), Some(OperationState::Working));
    }

    #[test]
    fn waiter_wakes_on_terminal_state() {
        let cell = Arc::new(OperationCell::new());
        assert!(cell.begin().is_ok());
        let writer = Arc::clone(&cell);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set(OperationState::Fail).is_ok()
        });
        let seen = cell.wait_while_working(Duration::from_secs(5)).ok();
        assert_eq!(seen, Some(OperationState::Fail));
        assert!(handle.join().unwrap_or(false));
    }

    #[test]
    fn response_board_times_out_without_response() {
        let board = ResponseBoard::new();
        let frame = board.wait_for("scope_get_equ_coord", Duration::from_millis(10)).ok();
        assert_eq!(frame, Some(None));
    }
}
