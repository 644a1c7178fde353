//! Background reader that turns device frames into operation state.
//!
//! The listener is the only reader of the socket. Each iteration it pulls
//! whatever bytes the transport has, reassembles CRLF frames, and:
//!
//! - copies terminal `AutoGoto` states (`complete`, `fail`) into the
//!   shared [`OperationCell`];
//! - records responses on the [`ResponseBoard`];
//! - logs and drops frames that fail to decode.
//!
//! It runs until its run flag is cleared. [`EventListener::stop`] joins it
//! with a bounded timeout and abandons the thread if it does not exit.

use crate::codec::FrameDecoder;
use crate::config::SessionConfig;
use crate::error::{ScopeError, ScopeResult};
use crate::model::{Frame, FrameKind, AUTO_GOTO_EVENT};
use crate::session::operation::{OperationCell, ResponseBoard};
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tunables of the listener loop.
#[derive(Clone, Debug)]
pub struct ListenerOptions {
    /// Sleep after a receive that returned no data.
    pub idle: Duration,
    pub buffer_bytes: usize,
    /// Log every decoded frame.
    pub debug: bool,
}

impl ListenerOptions {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            idle: config.listener_idle(),
            buffer_bytes: config.receive_buffer_bytes,
            debug: config.debug,
        }
    }
}

/// Handle to the running listener thread.
pub struct EventListener {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    exited: mpsc::Receiver<()>,
}

impl EventListener {
    pub fn spawn(
        transport: Arc<Transport>,
        operation: Arc<OperationCell>,
        responses: Arc<ResponseBoard>,
        options: ListenerOptions,
    ) -> ScopeResult<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (exit_tx, exited) = mpsc::channel();
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("event-listener".into())
            .spawn(move || {
                listen(&transport, &operation, &responses, &options, &flag);
                let _ = exit_tx.send(());
            })
            .map_err(|err| ScopeError::io("failed to spawn event listener", err))?;
        Ok(Self {
            running,
            handle: Some(handle),
            exited,
        })
    }

    /// Clear the run flag and wait up to `join_timeout` for the thread.
    ///
    /// Returns `false` when the thread did not exit in time; it is then
    /// detached and left to finish on its own.
    pub fn stop(mut self, join_timeout: Duration) -> bool {
        self.running.store(false, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return true;
        };
        match self.exited.recv_timeout(join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("event listener panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = u64::try_from(join_timeout.as_millis()).unwrap_or(u64::MAX),
                    "event listener did not stop in time; abandoning it"
                );
                false
            }
        }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn listen(
    transport: &Transport,
    operation: &OperationCell,
    responses: &ResponseBoard,
    options: &ListenerOptions,
    running: &AtomicBool,
) {
    let mut decoder = FrameDecoder::new();
    let mut buffer = vec![0u8; options.buffer_bytes.max(1)];
    let mut link: Option<u64> = None;
    info!("event listener started");

    while running.load(Ordering::SeqCst) {
        let received = match transport.receive_tagged(&mut buffer) {
            Ok(received) => received,
            Err(err) => {
                error!(error = %err, "event listener lost the device link");
                thread::sleep(options.idle);
                continue;
            }
        };
        // A partial frame from a dead link never completes on the new one.
        if link.is_some_and(|previous| previous != received.generation) {
            let dropped = decoder.clear();
            if dropped > 0 {
                warn!(
                    dropped,
                    generation = received.generation,
                    "discarding partial frame from previous link"
                );
            }
        }
        link = Some(received.generation);
        let count = received.count;
        if count == 0 {
            thread::sleep(options.idle);
            continue;
        }

        decoder.push(buffer.get(..count).unwrap_or_default());
        while let Some(decoded) = decoder.next_frame() {
            match decoded {
                Ok(frame) => {
                    if let Err(err) = dispatch_frame(frame, operation, responses, options.debug) {
                        error!(error = %err, "failed to record frame");
                    }
                }
                Err(err) => warn!(error = %err, context = ?err.context, "dropping undecodable frame"),
            }
        }
    }
    info!("event listener stopped");
}

/// Apply one decoded frame to the shared state.
pub(crate) fn dispatch_frame(
    frame: Frame,
    operation: &OperationCell,
    responses: &ResponseBoard,
    verbose: bool,
) -> ScopeResult<()> {
    if verbose {
        debug!(frame = ?frame.fields(), "received frame");
    }
    match frame.kind() {
        FrameKind::Event(AUTO_GOTO_EVENT) => {
            debug!(state = frame.state().unwrap_or("<missing>"), "AutoGoto state");
            if let Some(outcome) = frame.goto_outcome() {
                let previous = operation.set(outcome)?;
                info!(%previous, %outcome, "goto finished");
            }
            Ok(())
        }
        FrameKind::Response(method) => {
            let method = method.to_string();
            responses.record(&method, frame)
        }
        FrameKind::Event(_) | FrameKind::Other => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationState;
    use crate::transport::{Connection, Connector};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    /// Hands out one in-memory link per scripted payload, then refuses.
    struct ReplayLinks(Mutex<VecDeque<&'static [u8]>>);

    impl Connector for ReplayLinks {
        fn connect(&self) -> io::Result<Connection> {
            let incoming = self.0.lock().ok().and_then(|mut links| links.pop_front());
            match incoming {
                Some(bytes) => Ok(Connection {
                    reader: Box::new(io::Cursor::new(bytes.to_vec())),
                    writer: Box::new(io::sink()),
                }),
                None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
            }
        }

        fn describe(&self) -> String {
            "replay".to_string()
        }
    }

    fn quick_options() -> ListenerOptions {
        ListenerOptions {
            idle: Duration::from_millis(1),
            buffer_bytes: 64,
            debug: true,
        }
    }

    fn frame(value: Value) -> Frame {
        match value {
            Value::Object(map) => Frame::new(map),
            _ => Frame::new(serde_json::Map::new()),
        }
    }

    #[test]
    fn working_events_leave_state_untouched() {
        let operation = OperationCell::new();
        let responses = ResponseBoard::new();
        assert!(operation.begin().is_ok());
        let event = frame(json!({"Event": "AutoGoto", "state": "working"}));
        assert!(dispatch_frame(event, &operation, &responses, false).is_ok());
        assert_eq!(operation.get().ok(), Some(OperationState::Working));
    }

    #[test]
    fn fail_event_is_recorded() {
        let operation = OperationCell::new();
        let responses = ResponseBoard::new();
        assert!(operation.begin().is_ok());
        let event = frame(json!({"Event": "AutoGoto", "state": "fail"}));
        assert!(dispatch_frame(event, &operation, &responses, true).is_ok());
        assert_eq!(operation.get().ok(), Some(OperationState::Fail));
    }

    #[test]
    fn responses_land_on_the_board() {
        let operation = OperationCell::new();
        let responses = ResponseBoard::new();
        let response = frame(json!({"method": "scope_get_equ_coord", "result": {"ra": 1.5, "dec": 2.5}}));
        assert!(dispatch_frame(response, &operation, &responses, false).is_ok());
        let stored = responses
            .wait_for("scope_get_equ_coord", Duration::from_millis(1))
            .ok()
            .flatten();
        assert_eq!(stored.and_then(|f| f.result().cloned()), Some(json!({"ra": 1.5, "dec": 2.5})));
        assert_eq!(operation.get().ok(), Some(OperationState::Idle));
    }

    #[test]
    fn partial_frame_from_dropped_link_does_not_swallow_the_next_frame() {
        let links: Vec<&'static [u8]> = vec![
            b"{\"Event\":\"AutoGoto\",\"sta",
            b"{\"Event\":\"AutoGoto\",\"state\":\"complete\"}\r\n",
        ];
        let connector = Arc::new(ReplayLinks(Mutex::new(links.into())));
        let transport = Transport::connect(connector).map(Arc::new);
        assert!(transport.is_ok());
        let operation = Arc::new(OperationCell::new());
        let responses = Arc::new(ResponseBoard::new());
        assert!(operation.begin().is_ok());

        let listener = transport.and_then(|transport| {
            EventListener::spawn(transport, Arc::clone(&operation), responses, quick_options())
        });
        let state = operation.wait_while_working(Duration::from_secs(2)).ok();
        let stopped = listener.map(|l| l.stop(Duration::from_secs(2))).ok();

        assert_eq!(state, Some(OperationState::Complete));
        assert_eq!(stopped, Some(true));
    }

    #[test]
    fn frames_split_within_one_link_still_reassemble() {
        let links: Vec<&'static [u8]> = vec![b"{\"Event\":\"AutoGoto\",\"state\":\"fail\"}\r\n"];
        let connector = Arc::new(ReplayLinks(Mutex::new(links.into())));
        let transport = Transport::connect(connector).map(Arc::new);
        assert!(transport.is_ok());
        let operation = Arc::new(OperationCell::new());
        assert!(operation.begin().is_ok());
        let options = ListenerOptions {
            buffer_bytes: 5,
            ..quick_options()
        };

        let listener = transport.and_then(|transport| {
            EventListener::spawn(transport, Arc::clone(&operation), Arc::new(ResponseBoard::new()), options)
        });
        let state = operation.wait_while_working(Duration::from_secs(2)).ok();
        let stopped = listener.map(|l| l.stop(Duration::from_secs(2))).ok();

        assert_eq!(state, Some(OperationState::Fail));
        assert_eq!(stopped, Some(true));
    }
}
