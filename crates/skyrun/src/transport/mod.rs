//! Socket ownership with a reconnect-once policy.
//!
//! The [`Transport`] owns one logical link to the device, split into a read
//! side (used only by the event listener) and a write side (used by the
//! session). Any send or receive failure triggers exactly one reconnect and
//! one retry; a second consecutive failure is a fatal `E_CONNECTION` error.
//!
//! Reconnects are serialized and tagged with a generation number. When the
//! sender and the listener both see the same dead socket, the first one to
//! get the lock reconnects and the other simply adopts the new link.

use crate::config::SessionConfig;
use crate::error::{ScopeError, ScopeResult};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Both halves of a freshly opened link.
pub struct Connection {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Opens links to the device.
pub trait Connector: Send + Sync {
    fn connect(&self) -> io::Result<Connection>;

    /// Human-readable peer description for logs.
    fn describe(&self) -> String;
}

/// Production connector: plain TCP with a read timeout.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            read_timeout: (!read_timeout.is_zero()).then_some(read_timeout),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.address(), config.connect_timeout(), config.read_timeout())
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> io::Result<Connection> {
        let mut last_error = None;
        for addr in self.address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(self.read_timeout)?;
                    let reader = stream.try_clone()?;
                    return Ok(Connection {
                        reader: Box::new(reader),
                        writer: Box::new(stream),
                    });
                }
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                ErrorKind::NotFound,
                format!("{} did not resolve to any address", self.address),
            )
        }))
    }

    fn describe(&self) -> String {
        self.address.clone()
    }
}

struct Endpoint<T> {
    generation: u64,
    io: T,
}

/// Outcome of one successful read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Received {
    /// Bytes written into the caller's buffer; 0 on a read timeout.
    pub count: usize,
    /// Generation of the link the bytes were read from.
    pub generation: u64,
}

struct LinkFailure {
    generation: u64,
    error: io::Error,
}

/// Shared link to the device.
///
/// `receive` must only be called from one thread at a time (the listener);
/// `send` may be called from any thread.
pub struct Transport {
    connector: Arc<dyn Connector>,
    generation: Mutex<u64>,
    writer: Mutex<Endpoint<Box<dyn Write + Send>>>,
    reader: Mutex<Option<Endpoint<Box<dyn Read + Send>>>>,
}

impl Transport {
    /// Open the initial link. Failure here is fatal; there is nothing to retry onto.
    pub fn connect(connector: Arc<dyn Connector>) -> ScopeResult<Self> {
        let peer = connector.describe();
        let Connection { reader, writer } = connector
            .connect()
            .map_err(|err| ScopeError::connection(format!("failed to connect to {peer}"), err))?;
        info!(peer = %peer, "connected to device");
        Ok(Self {
            connector,
            generation: Mutex::new(0),
            writer: Mutex::new(Endpoint { generation: 0, io: writer }),
            reader: Mutex::new(Some(Endpoint { generation: 0, io: reader })),
        })
    }

    /// Number of reconnects performed so far.
    pub fn generation(&self) -> ScopeResult<u64> {
        self.generation
            .lock()
            .map(|generation| *generation)
            .map_err(|_| ScopeError::poisoned("transport generation"))
    }

    /// Write all of `bytes`, reconnecting and retrying once on failure.
    pub fn send(&self, bytes: &[u8]) -> ScopeResult<()> {
        let failure = match self.try_write(bytes)? {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };
        warn!(error = %failure.error, "send failed; reconnecting");
        self.reconnect(failure.generation)?;
        match self.try_write(bytes)? {
            Ok(()) => Ok(()),
            Err(retry) => Err(ScopeError::connection("send failed after reconnect", retry.error)),
        }
    }

    /// Read available bytes into `buf`.
    ///
    /// Returns `Ok(0)` when the read timed out with nothing to read. End of
    /// stream counts as a failure and goes through the reconnect path.
    pub fn receive(&self, buf: &mut [u8]) -> ScopeResult<usize> {
        self.receive_tagged(buf).map(|received| received.count)
    }

    /// Like [`Transport::receive`], but also reports which link the bytes
    /// came from so a reader can discard carry-over from a dead link.
    pub fn receive_tagged(&self, buf: &mut [u8]) -> ScopeResult<Received> {
        let failure = match self.try_read(buf)? {
            Ok(received) => return Ok(received),
            Err(failure) => failure,
        };
        warn!(error = %failure.error, "receive failed; reconnecting");
        self.reconnect(failure.generation)?;
        match self.try_read(buf)? {
            Ok(received) => Ok(received),
            Err(retry) => Err(ScopeError::connection("receive failed after reconnect", retry.error)),
        }
    }

    fn try_write(&self, bytes: &[u8]) -> ScopeResult<Result<(), LinkFailure>> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| ScopeError::poisoned("transport writer"))?;
        let generation = writer.generation;
        let result = writer
            .io
            .write_all(bytes)
            .and_then(|()| writer.io.flush());
        Ok(result.map_err(|error| LinkFailure { generation, error }))
    }

    fn try_read(&self, buf: &mut [u8]) -> ScopeResult<Result<Received, LinkFailure>> {
        // The reader is checked out so no lock is held while blocked in `read`.
        let Endpoint { generation, mut io } = self
            .reader
            .lock()
            .map_err(|_| ScopeError::poisoned("transport reader"))?
            .take()
            .ok_or_else(|| ScopeError::internal("transport reader is already in use"))?;

        let result = match io.read(buf) {
            Ok(0) if !buf.is_empty() => Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "connection closed by device",
            )),
            Ok(count) => Ok(count),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(err) => Err(err),
        };

        let mut slot = self
            .reader
            .lock()
            .map_err(|_| ScopeError::poisoned("transport reader"))?;
        // A reconnect during the read already installed a newer reader.
        if slot.is_none() {
            *slot = Some(Endpoint { generation, io });
        }
        Ok(result
            .map(|count| Received { count, generation })
            .map_err(|error| LinkFailure { generation, error }))
    }

    fn reconnect(&self, failed_generation: u64) -> ScopeResult<()> {
        let mut generation = self
            .generation
            .lock()
            .map_err(|_| ScopeError::poisoned("transport generation"))?;
        if *generation != failed_generation {
            debug!(
                failed_generation,
                current = *generation,
                "link already replaced by another thread"
            );
            return Ok(());
        }

        let peer = self.connector.describe();
        let Connection { reader, writer } = self
            .connector
            .connect()
            .map_err(|err| ScopeError::connection(format!("reconnect to {peer} failed"), err))?;
        *generation += 1;
        let current = *generation;

        *self
            .writer
            .lock()
            .map_err(|_| ScopeError::poisoned("transport writer"))? = Endpoint {
            generation: current,
            io: writer,
        };
        *self
            .reader
            .lock()
            .map_err(|_| ScopeError::poisoned("transport reader"))? = Some(Endpoint {
            generation: current,
            io: reader,
        });
        info!(peer = %peer, generation = current, "reconnected to device");
        Ok(())
    }
}
