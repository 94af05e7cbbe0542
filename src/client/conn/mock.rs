//! A scripted transport, suitable for testing exchanges without a network.
//!
//! A [`MockTransport`] resolves every name to a fixed list of candidates and
//! hands out queued [`MockConnection`]s. Each connection replays a script of
//! reads and records everything written to it. Clones of a connection share
//! its state, so a test can keep a clone to inspect after the exchange.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::Uri;
use parking_lot::Mutex;
use tracing::trace;

use super::{Connection, Transport};
use crate::BoxFuture;

#[derive(Debug, Clone)]
enum Resolution {
    Loopback,
    Candidates(Vec<SocketAddr>),
    Error(io::ErrorKind),
}

#[derive(Debug)]
struct TransportState {
    resolution: Resolution,
    resolve_delay: Option<Duration>,
    connections: VecDeque<MockConnection>,
    lookups: Vec<(String, u16)>,
}

/// A transport which replays scripted connections.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a transport which resolves every host to the loopback address.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                resolution: Resolution::Loopback,
                resolve_delay: None,
                connections: VecDeque::new(),
                lookups: Vec::new(),
            })),
        }
    }

    /// Resolve every host to these candidates, in order.
    pub fn with_candidates(self, candidates: Vec<SocketAddr>) -> Self {
        self.state.lock().resolution = Resolution::Candidates(candidates);
        self
    }

    /// Fail every resolution with this error kind.
    pub fn with_resolve_error(self, kind: io::ErrorKind) -> Self {
        self.state.lock().resolution = Resolution::Error(kind);
        self
    }

    /// Wait before answering each resolution.
    pub fn with_resolve_delay(self, delay: Duration) -> Self {
        self.state.lock().resolve_delay = Some(delay);
        self
    }

    /// Queue a connection for the next exchange.
    ///
    /// Exchanges which find the queue empty get a connection with an empty
    /// script.
    pub fn with_connection(self, connection: MockConnection) -> Self {
        self.push(connection);
        self
    }

    /// Queue a connection for the next exchange.
    pub fn push(&self, connection: MockConnection) {
        self.state.lock().connections.push_back(connection);
    }

    /// Every `(host, port)` pair resolved so far.
    pub fn lookups(&self) -> Vec<(String, u16)> {
        self.state.lock().lookups.clone()
    }
}

impl Transport for MockTransport {
    type Connection = MockConnection;

    fn resolve(&self, host: &str, port: u16) -> BoxFuture<'static, io::Result<Vec<SocketAddr>>> {
        let (resolution, delay) = {
            let mut state = self.state.lock();
            state.lookups.push((host.to_owned(), port));
            (state.resolution.clone(), state.resolve_delay)
        };

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            match resolution {
                Resolution::Loopback => Ok(vec![SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)]),
                Resolution::Candidates(candidates) => Ok(candidates),
                Resolution::Error(kind) => Err(io::Error::new(kind, "mock resolution error")),
            }
        })
    }

    fn connection(&self, uri: &Uri) -> MockConnection {
        trace!(%uri, "mock connection");
        self.state
            .lock()
            .connections
            .pop_front()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
enum MockRead {
    Data(Bytes),
    Delay(Duration),
    Error(io::ErrorKind),
}

#[derive(Debug, Default)]
struct ConnectionState {
    refused: Vec<SocketAddr>,
    write_error: Option<io::ErrorKind>,
    reads: VecDeque<MockRead>,
    written: BytesMut,
    writes: usize,
    attempts: Vec<SocketAddr>,
    connected: Option<SocketAddr>,
    disconnects: usize,
}

/// A connection which replays a script of reads.
///
/// Once the script is exhausted, reads return zero bytes (end of stream).
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<ConnectionState>>,
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockConnection")
            .field("connected", &state.connected)
            .field("pending_reads", &state.reads.len())
            .finish()
    }
}

impl MockConnection {
    /// Create a connection with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse connection attempts to `addr`.
    pub fn refuse(self, addr: SocketAddr) -> Self {
        self.state.lock().refused.push(addr);
        self
    }

    /// Fail every write with this error kind.
    pub fn fail_writes(self, kind: io::ErrorKind) -> Self {
        self.state.lock().write_error = Some(kind);
        self
    }

    /// Add a read returning `data` to the script.
    ///
    /// Empty data reads as the end of the stream.
    pub fn respond(self, data: impl Into<Bytes>) -> Self {
        self.state.lock().reads.push_back(MockRead::Data(data.into()));
        self
    }

    /// Add a pause to the script before the next read completes.
    pub fn delay(self, delay: Duration) -> Self {
        self.state.lock().reads.push_back(MockRead::Delay(delay));
        self
    }

    /// Add a failing read to the script.
    pub fn read_error(self, kind: io::ErrorKind) -> Self {
        self.state.lock().reads.push_back(MockRead::Error(kind));
        self
    }

    /// Everything written to the connection.
    pub fn written(&self) -> Bytes {
        self.state.lock().written.clone().freeze()
    }

    /// Number of completed writes.
    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }

    /// Every address a connection was attempted to, in order.
    pub fn attempts(&self) -> Vec<SocketAddr> {
        self.state.lock().attempts.clone()
    }

    /// The address currently connected to.
    pub fn connected(&self) -> Option<SocketAddr> {
        self.state.lock().connected
    }

    /// Number of times an open connection was closed.
    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "mock connection is not open")
}

impl Connection for MockConnection {
    fn connect<'a>(&'a mut self, addr: SocketAddr, _host: &'a str) -> BoxFuture<'a, io::Result<()>> {
        let mut state = self.state.lock();
        state.attempts.push(addr);
        let result = if state.refused.contains(&addr) {
            Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock connection refused",
            ))
        } else {
            state.connected = Some(addr);
            Ok(())
        };
        Box::pin(std::future::ready(result))
    }

    fn write<'a>(&'a mut self, buf: &'a [u8]) -> BoxFuture<'a, io::Result<usize>> {
        let mut state = self.state.lock();
        let result = if state.connected.is_none() {
            Err(not_connected())
        } else if let Some(kind) = state.write_error {
            Err(io::Error::new(kind, "mock write error"))
        } else {
            state.written.extend_from_slice(buf);
            state.writes += 1;
            Ok(buf.len())
        };
        Box::pin(std::future::ready(result))
    }

    fn read<'a>(&'a mut self, buf: &'a mut BytesMut) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            loop {
                let step = {
                    let mut state = self.state.lock();
                    if state.connected.is_none() {
                        return Err(not_connected());
                    }
                    state.reads.pop_front()
                };

                match step {
                    None => return Ok(0),
                    Some(MockRead::Data(data)) => {
                        buf.extend_from_slice(&data);
                        return Ok(data.len());
                    }
                    Some(MockRead::Delay(delay)) => tokio::time::sleep(delay).await,
                    Some(MockRead::Error(kind)) => {
                        return Err(io::Error::new(kind, "mock read error"))
                    }
                }
            }
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, ()> {
        let mut state = self.state.lock();
        if state.connected.take().is_some() {
            state.disconnects += 1;
        }
        Box::pin(std::future::ready(()))
    }
}
