//! Single-threaded networking runtime.
//!
//! One mio `Poll` multiplexes the TCP listener, the UDP socket and every
//! client connection:
//! - `LineBuffer`: per-session receive buffer with newline framing
//! - `SessionTable`: slab of live client sessions, keyed by token
//! - `ServerContext`: owns the poller, sockets, sessions and counters

mod buffer;
mod event_loop;
mod listener;
mod session;
mod token;

pub use buffer::{BufferError, LineBuffer, MAX_LINE_LENGTH};
pub use event_loop::{ServerContext, ServerError, MAX_DATAGRAM_SIZE};
pub use session::{
    serve_stream, write_response, AdmitError, ClientSession, CloseReason, ReadOutcome, SessionTable,
    READ_CHUNK_SIZE,
};
pub use token::{Source, LISTENER_TOKEN, UDP_TOKEN};

use crate::config::Config;
use crate::stats::Stats;

/// Bind, run until shutdown, and return the final counters.
pub fn run(config: &Config) -> Result<Stats, ServerError> {
    ServerContext::bind(config)?.run()
}
