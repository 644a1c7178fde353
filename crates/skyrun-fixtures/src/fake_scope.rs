//! A fake telescope on a local TCP port.
//!
//! The server answers every command with a `{"method", "id", "code": 0}`
//! response, replays a scripted list of `AutoGoto` states after each
//! `iscope_start_view`, and records every command it receives. It can also
//! split its writes into small chunks and close the first N connections
//! right after accepting them, to exercise frame reassembly and reconnects.

use serde_json::{json, Value};
use skyrun::config::SessionConfig;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(5);

/// Configures a [`FakeScope`] before it starts listening.
#[derive(Clone, Debug)]
pub struct FakeScopeBuilder {
    bind: String,
    goto_events: Vec<String>,
    event_delay: Duration,
    chunk_size: Option<usize>,
    drop_connections: usize,
    pointing: [f64; 2],
}

impl Default for FakeScopeBuilder {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:0".to_string(),
            goto_events: vec!["working".to_string(), "complete".to_string()],
            event_delay: Duration::from_millis(20),
            chunk_size: None,
            drop_connections: 0,
            pointing: [10.684, 41.269],
        }
    }
}

impl FakeScopeBuilder {
    /// Listen address; defaults to an ephemeral localhost port.
    #[must_use]
    pub fn bind(mut self, address: &str) -> Self {
        self.bind = address.to_string();
        self
    }

    /// `AutoGoto` states sent after each `iscope_start_view`.
    #[must_use]
    pub fn goto_events(mut self, states: &[&str]) -> Self {
        self.goto_events = states.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Delay before and between the scripted events.
    #[must_use]
    pub fn event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = delay;
        self
    }

    /// Write everything in chunks of at most `size` bytes.
    #[must_use]
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Close the first `count` connections immediately after accepting them.
    #[must_use]
    pub fn drop_connections(mut self, count: usize) -> Self {
        self.drop_connections = count;
        self
    }

    /// Answer to `scope_get_equ_coord`.
    #[must_use]
    pub fn pointing(mut self, ra: f64, dec: f64) -> Self {
        self.pointing = [ra, dec];
        self
    }

    /// Bind and start serving on a background thread.
    pub fn start(self) -> FakeScope {
        FakeScope::start_with(self)
    }
}

#[derive(Debug, Default)]
struct Shared {
    commands: Mutex<Vec<Value>>,
    accepted: AtomicUsize,
    stop: AtomicBool,
}

/// Handle to a running fake telescope. Stops on drop.
#[derive(Debug)]
pub struct FakeScope {
    addr: SocketAddr,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
}

impl FakeScope {
    /// Builder for a scripted fake.
    #[must_use]
    pub fn builder() -> FakeScopeBuilder {
        FakeScopeBuilder::default()
    }

    /// Fake with default behaviour: every goto completes.
    #[must_use]
    pub fn start() -> Self {
        Self::builder().start()
    }

    fn start_with(options: FakeScopeBuilder) -> Self {
        let listener = TcpListener::bind(&options.bind).expect("bind fake scope");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().expect("local addr");
        let shared = Arc::new(Shared::default());
        let acceptor = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("fake-scope-accept".into())
                .spawn(move || accept_loop(&listener, &shared, &options))
                .expect("spawn fake scope")
        };
        Self {
            addr,
            shared,
            acceptor: Some(acceptor),
        }
    }

    /// Address the fake listens on.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Session config aimed at this fake with test-friendly timings.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            connect_timeout_ms: 2_000,
            read_timeout_ms: 20,
            poll_interval_ms: 10,
            heartbeat_every: 2,
            completion_timeout_ms: Some(5_000),
            settle_delay_ms: 0,
            listener_idle_ms: 5,
            listener_join_timeout_ms: 1_000,
            ..SessionConfig::default()
        }
    }

    /// Every command received so far, across connections.
    #[must_use]
    pub fn commands(&self) -> Vec<Value> {
        self.shared.commands.lock().unwrap().clone()
    }

    /// Method names of the received commands, in order.
    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        self.commands()
            .iter()
            .filter_map(|cmd| cmd.get("method").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Connections accepted so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Poll until `predicate` holds on the received methods or `timeout` passes.
    pub fn wait_for_methods(&self, timeout: Duration, predicate: impl Fn(&[String]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate(&self.methods()) {
                return true;
            }
            thread::sleep(POLL);
        }
        predicate(&self.methods())
    }
}

impl Drop for FakeScope {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: &TcpListener, shared: &Arc<Shared>, options: &FakeScopeBuilder) {
    let mut handlers = Vec::new();
    while !shared.stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let index = shared.accepted.fetch_add(1, Ordering::SeqCst);
                if index < options.drop_connections {
                    let _ = stream.shutdown(Shutdown::Both);
                    continue;
                }
                let shared = Arc::clone(shared);
                let options = options.clone();
                handlers.push(thread::spawn(move || serve(stream, &shared, &options)));
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(POLL),
            Err(_) => break,
        }
    }
    for handler in handlers {
        let _ = handler.join();
    }
}

fn serve(stream: TcpStream, shared: &Shared, options: &FakeScopeBuilder) {
    stream.set_nonblocking(false).expect("blocking stream");
    stream
        .set_read_timeout(Some(Duration::from_millis(20)))
        .expect("read timeout");
    let mut reader = stream.try_clone().expect("clone stream");
    let mut writer = stream;
    let mut pending = Vec::new();
    let mut buf = [0u8; 4096];

    while !shared.stop.load(Ordering::SeqCst) {
        let count = match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(count) => count,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(_) => return,
        };
        pending.extend_from_slice(buf.get(..count).unwrap_or_default());
        while let Some(end) = pending.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = pending.drain(..end + 2).take(end).collect();
            let Ok(command) = serde_json::from_slice::<Value>(&line) else {
                continue;
            };
            shared.commands.lock().unwrap().push(command.clone());
            if respond(&mut writer, &command, options).is_err() {
                return;
            }
        }
    }
}

fn respond(writer: &mut TcpStream, command: &Value, options: &FakeScopeBuilder) -> std::io::Result<()> {
    let method = command.get("method").and_then(Value::as_str).unwrap_or_default();
    let id = command.get("id").cloned().unwrap_or(Value::Null);
    let result = match method {
        "scope_get_equ_coord" => json!({"ra": options.pointing[0], "dec": options.pointing[1]}),
        "test_connection" => json!("server connected!"),
        _ => json!(0),
    };
    let response = json!({
        "jsonrpc": "2.0",
        "Timestamp": "9507.244805160",
        "method": method,
        "result": result,
        "code": 0,
        "id": id,
    });
    write_frame(writer, &response, options.chunk_size)?;

    if method == "iscope_start_view" {
        for state in &options.goto_events {
            thread::sleep(options.event_delay);
            let event = json!({"Event": "AutoGoto", "Timestamp": "9507.2", "state": state});
            write_frame(writer, &event, options.chunk_size)?;
        }
    }
    Ok(())
}

fn write_frame(writer: &mut TcpStream, frame: &Value, chunk_size: Option<usize>) -> std::io::Result<()> {
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.extend_from_slice(b"\r\n");
    match chunk_size {
        None => writer.write_all(&bytes)?,
        Some(size) => {
            for chunk in bytes.chunks(size) {
                writer.write_all(chunk)?;
                writer.flush()?;
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
    writer.flush()
}
