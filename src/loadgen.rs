//! Concurrent TCP load generator.
//!
//! Opens N connections, one tokio task each, and sends M requests per
//! connection. Requests cycle through an echo line, `/time`, `/stats` and
//! `/help`; the full response is read before the next request goes out.

use bytes::{BufMut, BytesMut};
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Number of lines in the `/help` response.
pub const HELP_RESPONSE_LINES: usize = 5;

/// Invalid load generator settings.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid load settings: {0}")]
    Invalid(&'static str),
}

/// What the `index`th request on a connection asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Echo,
    Time,
    Stats,
    Help,
}

impl RequestKind {
    pub fn for_index(index: usize) -> Self {
        match index % 4 {
            0 => RequestKind::Echo,
            1 => RequestKind::Time,
            2 => RequestKind::Stats,
            _ => RequestKind::Help,
        }
    }

    /// Lines the server answers this request with.
    pub fn response_lines(self) -> usize {
        match self {
            RequestKind::Help => HELP_RESPONSE_LINES,
            _ => 1,
        }
    }
}

/// Encode the `index`th request of connection `conn_id`, newline included.
pub fn request_line(conn_id: usize, index: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(32);
    match RequestKind::for_index(index) {
        RequestKind::Echo => buf.put_slice(format!("hello-{conn_id}-{index}\n").as_bytes()),
        RequestKind::Time => buf.put_slice(b"/time\n"),
        RequestKind::Stats => buf.put_slice(b"/stats\n"),
        RequestKind::Help => buf.put_slice(b"/help\n"),
    }
    buf
}

/// Outcome of one connection's run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionReport {
    pub conn_id: usize,
    pub requests_sent: usize,
    /// Requests whose full response arrived.
    pub responses_received: usize,
    /// Echo responses that did not match the request.
    pub echo_mismatches: usize,
    /// Stopped before all requests completed (I/O error or EOF).
    pub ended_early: bool,
}

/// Send `messages` requests over `stream`, reading each full response.
///
/// Never fails: I/O errors and EOF end the run and are recorded in the
/// report.
pub async fn drive_connection<S>(conn_id: usize, stream: S, messages: usize) -> ConnectionReport
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut report = ConnectionReport {
        conn_id,
        ..ConnectionReport::default()
    };

    if let Err(e) = exchange(&mut report, stream, messages).await {
        debug!(conn_id, error = %e, "Connection ended early");
        report.ended_early = true;
    }
    report
}

async fn exchange<S>(report: &mut ConnectionReport, stream: S, messages: usize) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = Vec::with_capacity(128);

    for index in 0..messages {
        let kind = RequestKind::for_index(index);
        let request = request_line(report.conn_id, index);

        writer.write_all(&request).await?;
        writer.flush().await?;
        report.requests_sent += 1;

        for _ in 0..kind.response_lines() {
            line.clear();
            let n = reader.read_until(b'\n', &mut line).await?;
            if n == 0 || line.last() != Some(&b'\n') {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-response",
                ));
            }
        }

        // Only the last line is still in `line`; echo answers have one.
        if kind == RequestKind::Echo && line[..] != request[..] {
            report.echo_mismatches += 1;
        }
        report.responses_received += 1;
    }
    Ok(())
}

/// Load generator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
    pub host: String,
    pub port: u16,
    pub connections: usize,
    pub messages: usize,
}

impl LoadConfig {
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.port == 0 {
            return Err(LoadError::Invalid("port must be between 1 and 65535"));
        }
        if self.connections == 0 {
            return Err(LoadError::Invalid("connections must be positive"));
        }
        if self.messages == 0 {
            return Err(LoadError::Invalid("messages must be positive"));
        }
        Ok(())
    }
}

/// Aggregate result of a load run.
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    /// One report per connection that was established, ordered by id.
    pub reports: Vec<ConnectionReport>,
    pub failed_connects: usize,
    pub elapsed: Duration,
}

impl LoadSummary {
    pub fn total_requests(&self) -> usize {
        self.reports.iter().map(|r| r.requests_sent).sum()
    }

    pub fn total_responses(&self) -> usize {
        self.reports.iter().map(|r| r.responses_received).sum()
    }

    /// Connections that finished every request.
    pub fn completed(&self) -> usize {
        self.reports.iter().filter(|r| !r.ended_early).count()
    }

    pub fn echo_mismatches(&self) -> usize {
        self.reports.iter().map(|r| r.echo_mismatches).sum()
    }
}

/// Run all connections concurrently and collect their reports.
pub async fn run(config: &LoadConfig) -> Result<LoadSummary, LoadError> {
    config.validate()?;

    let start = Instant::now();
    let mut tasks = JoinSet::new();

    for conn_id in 0..config.connections {
        let host = config.host.clone();
        let port = config.port;
        let messages = config.messages;

        tasks.spawn(async move {
            match TcpStream::connect((host.as_str(), port)).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    Ok(drive_connection(conn_id, stream, messages).await)
                }
                Err(e) => Err((conn_id, e)),
            }
        });
    }

    let mut summary = LoadSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(report)) => summary.reports.push(report),
            Ok(Err((conn_id, e))) => {
                warn!(conn_id, error = %e, "Connect failed");
                summary.failed_connects += 1;
            }
            Err(e) => {
                warn!(error = %e, "Connection task failed");
                summary.failed_connects += 1;
            }
        }
    }

    summary.reports.sort_by_key(|r| r.conn_id);
    summary.elapsed = start.elapsed();
    Ok(summary)
}
