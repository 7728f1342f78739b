//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! One thread owns a [`ServerContext`] and drives the TCP listener, the UDP
//! socket and every client session from a single `Poll`. mio readiness is
//! edge-triggered, so each handler drains its socket until would-block.
//!
//! ## Shutdown
//!
//! `/shutdown` (TCP or UDP) or a fatal condition on a server socket sets the
//! shutdown flag. The rest of the current event batch is skipped, every
//! session is closed without draining, and `run` returns.

use crate::config::Config;
use crate::protocol::{process_line, RESPONSE_BUFFER_SIZE};
use crate::runtime::buffer::MAX_LINE_LENGTH;
use crate::runtime::listener;
use crate::runtime::session::{AdmitError, CloseReason, ReadOutcome, SessionTable};
use crate::runtime::token::{Source, LISTENER_TOKEN, UDP_TOKEN};
use crate::stats::Stats;
use mio::event::Event;
use mio::net::{TcpListener, UdpSocket};
use mio::{Events, Interest, Poll};
use std::io;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Largest datagram read in one `recv_from`; longer ones are truncated.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Errors that end a `run` call with a failure status.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address '{0}'")]
    Address(String),
    #[error("failed to {stage}: {source}")]
    Startup {
        stage: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("event loop wait failed: {0}")]
    Poll(#[source] io::Error),
    #[error("{0} socket reported an error or hangup")]
    SocketFailure(&'static str),
}

fn startup(stage: &'static str) -> impl FnOnce(io::Error) -> ServerError {
    move |source| ServerError::Startup { stage, source }
}

/// Everything one server instance owns: poller, both server sockets, the
/// session table, counters and the shutdown flag.
///
/// Dropping the context closes every descriptor it still holds.
pub struct ServerContext {
    poll: Poll,
    listener: TcpListener,
    udp: UdpSocket,
    sessions: SessionTable,
    stats: Stats,
    shutdown: bool,
    failure: Option<ServerError>,
    max_events: usize,
    local_addr: SocketAddr,
}

impl ServerContext {
    /// Create the poller and both sockets and register them.
    ///
    /// Any failure returns before the loop exists; sockets opened so far are
    /// dropped on the way out.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let ip: IpAddr = config
            .host
            .parse()
            .map_err(|_| ServerError::Address(config.host.clone()))?;
        let addr = SocketAddr::new(ip, config.port);

        let poll = Poll::new().map_err(startup("create poller"))?;
        let (listener, udp) =
            listener::bind_pair(addr, config.listen_backlog).map_err(startup("bind sockets"))?;

        let mut listener = TcpListener::from_std(listener);
        let mut udp = UdpSocket::from_std(udp);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(startup("register listener"))?;
        poll.registry()
            .register(&mut udp, UDP_TOKEN, Interest::READABLE)
            .map_err(startup("register udp socket"))?;

        let local_addr = listener.local_addr().map_err(startup("read local address"))?;

        Ok(Self {
            poll,
            listener,
            udp,
            sessions: SessionTable::new(config.max_clients, config.client_buffer_size),
            stats: Stats::new(),
            shutdown: false,
            failure: None,
            max_events: config.max_events.max(1),
            local_addr,
        })
    }

    /// Address the TCP listener is bound to; UDP shares its port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Run until shutdown, then tear everything down.
    ///
    /// Returns the final counters, or the error that forced the stop.
    pub fn run(mut self) -> Result<Stats, ServerError> {
        let mut events = Events::with_capacity(self.max_events);

        info!(
            addr = %self.local_addr,
            max_clients = self.sessions.max_clients(),
            max_events = self.max_events,
            "Server started"
        );

        while !self.shutdown {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Poll failed");
                self.fail(ServerError::Poll(e));
                break;
            }

            for event in events.iter() {
                self.handle_event(event);
                if self.shutdown {
                    break;
                }
            }
        }

        self.teardown();

        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(self.stats),
        }
    }

    fn handle_event(&mut self, event: &Event) {
        let source = Source::from_token(event.token());

        if is_hangup(event) {
            self.handle_hangup(source);
            return;
        }

        match source {
            Source::Listener => self.accept_connections(),
            Source::Udp => self.handle_datagrams(),
            Source::Client(key) => {
                if event.is_readable() || event.is_read_closed() {
                    self.handle_client_readable(key);
                }
            }
        }
    }

    /// Error or hangup: fatal on a server socket, otherwise closes the session.
    fn handle_hangup(&mut self, source: Source) {
        if source.is_server_socket() {
            self.fail(ServerError::SocketFailure(source.label()));
            return;
        }
        if let Source::Client(conn_id) = source {
            self.close_session(conn_id, CloseReason::Hangup);
        }
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    match self
                        .sessions
                        .admit(self.poll.registry(), stream, &mut self.stats)
                    {
                        Ok(conn_id) => debug!(conn_id, peer = %peer, "Accepted connection"),
                        Err(AdmitError::AtCapacity(max_clients)) => {
                            warn!(peer = %peer, max_clients, "Connection limit reached, closing");
                        }
                        Err(e) => warn!(peer = %peer, error = %e, "Rejected connection"),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn handle_client_readable(&mut self, conn_id: usize) {
        let Some(session) = self.sessions.get_mut(conn_id) else {
            return;
        };

        let mut requested = false;
        let outcome = session.read_and_respond(&self.stats, &mut requested);

        if requested {
            self.request_shutdown("tcp");
        }
        if let ReadOutcome::Closed(reason) = outcome {
            self.close_session(conn_id, reason);
        }
    }

    fn handle_datagrams(&mut self) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let mut out = [0u8; RESPONSE_BUFFER_SIZE];

        loop {
            let (n, peer) = match self.udp.recv_from(&mut buf) {
                Ok(received) => received,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "UDP receive error");
                    break;
                }
            };
            self.stats.record_datagram();

            let line = &buf[..n.min(MAX_LINE_LENGTH)];
            let mut requested = false;
            let len = match process_line(line, &self.stats, &mut requested, &mut out) {
                Ok(len) => len,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Response suppressed");
                    0
                }
            };

            if requested {
                self.request_shutdown("udp");
            }
            if len > 0 {
                if let Err(e) = self.udp.send_to(&out[..len], peer) {
                    debug!(peer = %peer, error = %e, "UDP send failed");
                }
            }
        }
    }

    fn close_session(&mut self, conn_id: usize, reason: CloseReason) {
        if self
            .sessions
            .close(self.poll.registry(), conn_id, &mut self.stats)
        {
            debug!(conn_id, reason = %reason, "Connection closed");
        }
    }

    fn request_shutdown(&mut self, origin: &'static str) {
        if !self.shutdown {
            self.shutdown = true;
            info!(origin, "Shutdown requested");
        }
    }

    /// Stop with a failure status. The first failure wins.
    fn fail(&mut self, err: ServerError) {
        error!(error = %err, "Fatal server error");
        self.shutdown = true;
        self.failure.get_or_insert(err);
    }

    fn teardown(&mut self) {
        let closed = self
            .sessions
            .close_all(self.poll.registry(), &mut self.stats);
        let _ = self.poll.registry().deregister(&mut self.listener);
        let _ = self.poll.registry().deregister(&mut self.udp);

        info!(
            closed_sessions = closed,
            total_tcp_clients = self.stats.total_tcp_clients,
            current_tcp_clients = self.stats.current_tcp_clients,
            total_udp_messages = self.stats.total_udp_messages,
            "Server stopped"
        );
    }
}

/// Error, or both directions closed.
fn is_hangup(event: &Event) -> bool {
    event.is_error() || (event.is_read_closed() && event.is_write_closed())
}
