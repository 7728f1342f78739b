//! Client sessions for accepted TCP connections.
//!
//! Each session owns its stream and a [`LineBuffer`]. Sessions live in a slab
//! keyed by the value used as their poll token, so an event resolves to its
//! session in O(1) and a key is never handed out twice while its session is
//! alive. Callers look sessions up by key every time; references into the
//! slab do not survive an insert.

use crate::protocol::{process_line, RESPONSE_BUFFER_SIZE};
use crate::runtime::buffer::{BufferError, LineBuffer};
use crate::runtime::token::client_token;
use crate::stats::Stats;
use mio::net::TcpStream;
use mio::{Interest, Registry};
use slab::Slab;
use std::io::{self, Read, Write};
use std::ops::ControlFlow;
use thiserror::Error;
use tracing::debug;

/// Size of the stack buffer each `read` call fills.
pub const READ_CHUNK_SIZE: usize = 1024;

/// Why a connection was not turned into a session. The stream is dropped
/// (and so closed) in every case.
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("client limit of {0} reached")]
    AtCapacity(usize),
    #[error("failed to allocate session buffer: {0}")]
    Buffer(#[from] BufferError),
    #[error("failed to register connection: {0}")]
    Register(#[from] io::Error),
}

/// Why a session had to be destroyed.
#[derive(Debug, Error)]
pub enum CloseReason {
    #[error("peer closed connection")]
    PeerClosed,
    #[error("error or hangup reported by poller")]
    Hangup,
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    #[error("buffer growth failed: {0}")]
    Buffer(#[from] BufferError),
}

/// Result of draining a readable session.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Socket drained to would-block; the session stays open.
    Open,
    Closed(CloseReason),
}

/// Server-side state for one live TCP connection.
#[derive(Debug)]
pub struct ClientSession {
    stream: TcpStream,
    buffer: LineBuffer,
    alive: bool,
}

impl ClientSession {
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Read until would-block, answering every complete line.
    pub fn read_and_respond(&mut self, stats: &Stats, shutdown: &mut bool) -> ReadOutcome {
        serve_stream(&mut self.stream, &mut self.buffer, stats, shutdown)
    }

    /// Deregister and release the buffer. Returns false if already destroyed.
    /// The descriptor closes when the session is dropped.
    fn destroy(&mut self, registry: &Registry) -> bool {
        if !self.alive {
            return false;
        }
        let _ = registry.deregister(&mut self.stream);
        self.buffer.release();
        self.alive = false;
        true
    }
}

/// Read from `stream` until would-block, EOF or error, appending into
/// `buffer` and writing one response per complete line.
///
/// Responses go straight to the socket. Whatever does not fit when the
/// socket stops accepting data is dropped; there is no outbound queue.
/// A line whose response does not fit the response buffer gets no reply.
pub fn serve_stream<S: Read + Write>(
    stream: &mut S,
    buffer: &mut LineBuffer,
    stats: &Stats,
    shutdown: &mut bool,
) -> ReadOutcome {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut out = [0u8; RESPONSE_BUFFER_SIZE];

    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => return ReadOutcome::Closed(CloseReason::PeerClosed),
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Open,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return ReadOutcome::Closed(CloseReason::Read(e)),
        };

        if let Err(e) = buffer.append(&chunk[..n]) {
            return ReadOutcome::Closed(CloseReason::Buffer(e));
        }

        let mut write_error = None;
        buffer.drain_lines(|line| {
            let len = match process_line(line, stats, shutdown, &mut out) {
                Ok(len) => len,
                Err(e) => {
                    debug!(error = %e, "Response suppressed");
                    0
                }
            };
            if len > 0 {
                if let Err(e) = write_response(&mut *stream, &out[..len]) {
                    write_error = Some(e);
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        });

        if let Some(e) = write_error {
            return ReadOutcome::Closed(CloseReason::Write(e));
        }
    }
}

/// Write `response`, retrying short writes. Stops early without error when
/// the socket would block; returns the number of bytes sent.
pub fn write_response<W: Write>(stream: &mut W, response: &[u8]) -> io::Result<usize> {
    let mut sent = 0;
    while sent < response.len() {
        match stream.write(&response[sent..]) {
            Ok(0) => break,
            Ok(n) => sent += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!(dropped = response.len() - sent, "Socket not writable, dropping response tail");
                break;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(sent)
}

/// Table of live sessions, bounded by the client cap.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct SessionTable {
    sessions: Slab<ClientSession>,
    max_clients: usize,
    buffer_size: usize,
}

impl SessionTable {
    /// Create a table admitting up to `max_clients` sessions, each starting
    /// with a `buffer_size`-byte receive buffer.
    pub fn new(max_clients: usize, buffer_size: usize) -> Self {
        Self {
            sessions: Slab::new(),
            max_clients,
            buffer_size,
        }
    }

    /// Turn an accepted stream into a registered session.
    ///
    /// Rejected streams are dropped here and leave `stats` untouched.
    pub fn admit(
        &mut self,
        registry: &Registry,
        mut stream: TcpStream,
        stats: &mut Stats,
    ) -> Result<usize, AdmitError> {
        if self.sessions.len() >= self.max_clients {
            return Err(AdmitError::AtCapacity(self.max_clients));
        }

        let buffer = LineBuffer::with_capacity(self.buffer_size)?;
        let entry = self.sessions.vacant_entry();
        let key = entry.key();
        registry.register(&mut stream, client_token(key), Interest::READABLE)?;

        entry.insert(ClientSession {
            stream,
            buffer,
            alive: true,
        });
        stats.record_accept();
        Ok(key)
    }

    pub fn get_mut(&mut self, key: usize) -> Option<&mut ClientSession> {
        self.sessions.get_mut(key)
    }

    /// Destroy the session under `key`. A no-op for unknown keys.
    pub fn close(&mut self, registry: &Registry, key: usize, stats: &mut Stats) -> bool {
        match self.sessions.try_remove(key) {
            Some(mut session) => {
                if session.destroy(registry) {
                    stats.record_close();
                }
                true
            }
            None => false,
        }
    }

    /// Destroy every session. Returns how many were closed.
    pub fn close_all(&mut self, registry: &Registry, stats: &mut Stats) -> usize {
        let mut closed = 0;
        for mut session in self.sessions.drain() {
            if session.destroy(registry) {
                stats.record_close();
                closed += 1;
            }
        }
        closed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}
