//! Line protocol parser and response generator.
//!
//! A request is one line of text. Lines that do not start with `/` are echoed
//! back; `/`-prefixed lines select an administrative command:
//! - `/time`: local wall-clock time
//! - `/stats`: connection and datagram counters
//! - `/help`: command list
//! - `/shutdown`: ask the server to stop
//!
//! Processing is pure apart from reading the clock: no sockets, no connection
//! identity, so the same entry point serves TCP lines and UDP datagrams.

use crate::stats::Stats;
use chrono::{Local, NaiveDateTime};
use thiserror::Error;

/// Command tokens longer than this are truncated before matching.
pub const MAX_COMMAND_LENGTH: usize = 63;

/// Output buffer size the event loop hands to [`process_line`].
pub const RESPONSE_BUFFER_SIZE: usize = 4096;

/// Layout of the `/time` response, without the trailing newline.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Administrative command selected by a `/`-prefixed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Time,
    Stats,
    Help,
    Shutdown,
    Unknown,
}

impl Command {
    /// Match the first whitespace-delimited token of `line` (case-sensitive).
    pub fn parse(line: &[u8]) -> Self {
        let head = &line[..line.len().min(MAX_COMMAND_LENGTH)];
        let token = head
            .split(|b| b.is_ascii_whitespace())
            .next()
            .unwrap_or_default();

        match token {
            b"/time" => Command::Time,
            b"/stats" => Command::Stats,
            b"/help" => Command::Help,
            b"/shutdown" => Command::Shutdown,
            _ => Command::Unknown,
        }
    }
}

/// Classified request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    /// Nothing left after trimming.
    Empty,
    /// Plain text, echoed back verbatim.
    Echo(&'a [u8]),
    Command(Command),
}

impl<'a> Request<'a> {
    /// Trim `line` and classify it.
    pub fn parse(line: &'a [u8]) -> Self {
        let line = trim(line);
        match line.first() {
            None => Request::Empty,
            Some(b'/') => Request::Command(Command::parse(line)),
            Some(_) => Request::Echo(line),
        }
    }
}

/// Strip trailing `\n`, `\r`, space and tab, then leading space and tab.
pub fn trim(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b'\n' | b'\r' | b' ' | b'\t'))
        .map_or(0, |pos| pos + 1);
    let line = &line[..end];
    let start = line
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t'))
        .unwrap_or(line.len());
    &line[start..]
}

/// Errors returned by [`process_line`]. Nothing is written to the output
/// buffer when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("output buffer has zero capacity")]
    EmptyOutput,
    #[error("response needs {needed} bytes but output buffer holds {capacity}")]
    ResponseTooLarge { needed: usize, capacity: usize },
}

/// Process one line and write the response into `out`.
///
/// Returns the response length; zero means there is nothing to send.
/// `/shutdown` sets `*shutdown` to true (even if its response then does not
/// fit); no other path touches it.
pub fn process_line(
    line: &[u8],
    stats: &Stats,
    shutdown: &mut bool,
    out: &mut [u8],
) -> Result<usize, ProcessError> {
    if out.is_empty() {
        return Err(ProcessError::EmptyOutput);
    }

    match Request::parse(line) {
        Request::Empty => Ok(0),
        Request::Echo(text) => emit(out, &[text, b"\n"]),
        Request::Command(Command::Time) => {
            let response = Response::time(Local::now().naive_local());
            emit(out, &[response.as_bytes()])
        }
        Request::Command(Command::Stats) => emit(out, &[Response::stats(stats).as_bytes()]),
        Request::Command(Command::Help) => emit(out, &[Response::help()]),
        Request::Command(Command::Shutdown) => {
            *shutdown = true;
            emit(out, &[Response::shutting_down()])
        }
        Request::Command(Command::Unknown) => emit(out, &[Response::unknown_command()]),
    }
}

/// Copy `parts` into `out` back to back, or fail without writing anything.
fn emit(out: &mut [u8], parts: &[&[u8]]) -> Result<usize, ProcessError> {
    let needed: usize = parts.iter().map(|part| part.len()).sum();
    if needed > out.len() {
        return Err(ProcessError::ResponseTooLarge {
            needed,
            capacity: out.len(),
        });
    }

    let mut offset = 0;
    for part in parts {
        out[offset..offset + part.len()].copy_from_slice(part);
        offset += part.len();
    }
    Ok(needed)
}

/// Response generators
pub struct Response;

impl Response {
    /// `YYYY-MM-DD HH:MM:SS\n`
    pub fn time(now: NaiveDateTime) -> String {
        format!("{}\n", now.format(TIME_FORMAT))
    }

    pub fn stats(stats: &Stats) -> String {
        format!(
            "total_tcp_clients={} current_tcp_clients={} total_udp_messages={}\n",
            stats.total_tcp_clients, stats.current_tcp_clients, stats.total_udp_messages
        )
    }

    pub fn help() -> &'static [u8] {
        b"Available commands:\n/time\n/stats\n/shutdown\n/help\n"
    }

    pub fn shutting_down() -> &'static [u8] {
        b"shutting down\n"
    }

    pub fn unknown_command() -> &'static [u8] {
        b"unknown command\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn run(line: &str, stats: &Stats, shutdown: &mut bool) -> Result<String, ProcessError> {
        let mut out = [0u8; 256];
        let n = process_line(line.as_bytes(), stats, shutdown, &mut out)?;
        Ok(String::from_utf8(out[..n].to_vec()).unwrap())
    }

    #[test]
    fn test_echo_simple() {
        let mut shutdown = false;
        let out = run("hello", &Stats::new(), &mut shutdown).unwrap();
        assert_eq!(out, "hello\n");
        assert!(!shutdown);
    }

    #[test]
    fn test_echo_trims_surrounding_whitespace() {
        let mut shutdown = false;
        let stats = Stats::new();
        assert_eq!(run("   abc  ", &stats, &mut shutdown).unwrap(), "abc\n");
        assert_eq!(run("\t x y \r\n", &stats, &mut shutdown).unwrap(), "x y\n");
    }

    #[test]
    fn test_echo_is_idempotent() {
        let mut shutdown = false;
        let stats = Stats::new();
        let first = run("  repeat me\r\n", &stats, &mut shutdown).unwrap();
        let second = run("  repeat me\r\n", &stats, &mut shutdown).unwrap();
        assert_eq!(first, "repeat me\n");
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_line() {
        let mut shutdown = false;
        let stats = Stats::new();
        let mut out = [0u8; 16];
        assert_eq!(process_line(b"", &stats, &mut shutdown, &mut out), Ok(0));
        assert_eq!(process_line(b"   \n", &stats, &mut shutdown, &mut out), Ok(0));
        assert!(!shutdown);
    }

    #[test]
    fn test_time_format() {
        let mut shutdown = false;
        let out = run("/time", &Stats::new(), &mut shutdown).unwrap();
        let bytes = out.as_bytes();

        assert!(bytes.len() >= 20);
        assert!(bytes[..4].iter().all(u8::is_ascii_digit));
        assert_eq!(bytes[4], b'-');
        assert_eq!(bytes[7], b'-');
        assert_eq!(bytes[10], b' ');
        assert_eq!(bytes[13], b':');
        assert_eq!(bytes[16], b':');
        assert_eq!(bytes[19], b'\n');
    }

    #[test]
    fn test_time_response_layout() {
        let now = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(Response::time(now), "2024-01-02 03:04:05\n");
    }

    #[test]
    fn test_stats_output() {
        let stats = Stats {
            total_tcp_clients: 10,
            current_tcp_clients: 3,
            total_udp_messages: 5,
        };
        let mut shutdown = false;
        let out = run("/stats", &stats, &mut shutdown).unwrap();
        assert!(out.contains("total_tcp_clients=10"));
        assert!(out.contains("current_tcp_clients=3"));
        assert!(out.contains("total_udp_messages=5"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn test_help_output() {
        let mut shutdown = false;
        let out = run("/help", &Stats::new(), &mut shutdown).unwrap();
        for name in ["/time", "/stats", "/shutdown", "/help"] {
            assert!(out.contains(name), "missing {name}");
        }
        assert!(!shutdown);
    }

    #[test]
    fn test_shutdown_flag() {
        let stats = Stats {
            total_tcp_clients: 7,
            current_tcp_clients: 2,
            total_udp_messages: 1,
        };

        let mut shutdown = false;
        assert_eq!(run("/shutdown", &stats, &mut shutdown).unwrap(), "shutting down\n");
        assert!(shutdown);

        // Already set: stays set, same response
        assert_eq!(run("/shutdown", &stats, &mut shutdown).unwrap(), "shutting down\n");
        assert!(shutdown);
    }

    #[test]
    fn test_shutdown_flag_not_cleared_by_other_commands() {
        let mut shutdown = true;
        run("hello", &Stats::new(), &mut shutdown).unwrap();
        run("/help", &Stats::new(), &mut shutdown).unwrap();
        assert!(shutdown);
    }

    #[test]
    fn test_unknown_command() {
        let mut shutdown = false;
        let stats = Stats::new();
        assert_eq!(run("/foobar", &stats, &mut shutdown).unwrap(), "unknown command\n");
        assert_eq!(run("/TIME", &stats, &mut shutdown).unwrap(), "unknown command\n");
        assert_eq!(run("/", &stats, &mut shutdown).unwrap(), "unknown command\n");
        assert!(!shutdown);
    }

    #[test]
    fn test_command_with_arguments() {
        let mut shutdown = false;
        let out = run("  /help me please", &Stats::new(), &mut shutdown).unwrap();
        assert!(out.starts_with("Available commands:"));
    }

    #[test]
    fn test_long_command_token_truncated() {
        let token = format!("/time{}", "x".repeat(100));
        assert_eq!(Command::parse(token.as_bytes()), Command::Unknown);
    }

    #[test]
    fn test_small_buffer_failure() {
        let stats = Stats {
            total_tcp_clients: 1,
            current_tcp_clients: 1,
            total_udp_messages: 1,
        };
        let mut shutdown = false;
        let mut out = [0u8; 8];
        let result = process_line(b"/stats", &stats, &mut shutdown, &mut out);
        assert!(matches!(
            result,
            Err(ProcessError::ResponseTooLarge { capacity: 8, .. })
        ));
        assert_eq!(out, [0u8; 8]);
    }

    #[test]
    fn test_echo_exact_fit() {
        let mut shutdown = false;
        let mut out = [0u8; 4];
        assert_eq!(process_line(b"abc", &Stats::new(), &mut shutdown, &mut out), Ok(4));
        assert_eq!(&out, b"abc\n");
        assert!(process_line(b"abcd", &Stats::new(), &mut shutdown, &mut out).is_err());
    }

    #[test]
    fn test_zero_capacity_output() {
        let mut shutdown = false;
        let mut out = [0u8; 0];
        assert_eq!(
            process_line(b"hello", &Stats::new(), &mut shutdown, &mut out),
            Err(ProcessError::EmptyOutput)
        );
    }

    #[test]
    fn test_request_classification() {
        assert_eq!(Request::parse(b" \t\r\n"), Request::Empty);
        assert_eq!(Request::parse(b"  hi there\n"), Request::Echo(b"hi there"));
        assert_eq!(Request::parse(b"/stats extra"), Request::Command(Command::Stats));
        assert_eq!(Request::parse(b"/shutdown\r\n"), Request::Command(Command::Shutdown));
    }

    #[test]
    fn test_trim() {
        assert_eq!(trim(b"  a b \t\r\n"), b"a b");
        assert_eq!(trim(b"\n\n"), b"");
        // Leading newline is not stripped
        assert_eq!(trim(b"\nabc"), b"\nabc");
    }
}
