//! Readiness token assignment.
//!
//! Every source registered with the poller gets a `mio::Token`. Client
//! sessions use their slab key directly; the two server sockets take the
//! top of the token space, which the slab never reaches.

use mio::Token;

/// TCP listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// UDP socket.
pub const UDP_TOKEN: Token = Token(usize::MAX - 1);

/// What a readiness event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Listener,
    Udp,
    /// Client session, identified by its key in the session table.
    Client(usize),
}

impl Source {
    pub fn from_token(token: Token) -> Self {
        match token {
            LISTENER_TOKEN => Source::Listener,
            UDP_TOKEN => Source::Udp,
            Token(key) => Source::Client(key),
        }
    }

    /// Listener or UDP socket; failures on these stop the server.
    pub fn is_server_socket(self) -> bool {
        matches!(self, Source::Listener | Source::Udp)
    }

    /// Name used in logs and errors.
    pub fn label(self) -> &'static str {
        match self {
            Source::Listener => "tcp listener",
            Source::Udp => "udp",
            Source::Client(_) => "client",
        }
    }
}

/// Token for the session stored under `key`.
pub fn client_token(key: usize) -> Token {
    Token(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_from_token() {
        assert_eq!(Source::from_token(LISTENER_TOKEN), Source::Listener);
        assert_eq!(Source::from_token(UDP_TOKEN), Source::Udp);
        assert_eq!(Source::from_token(Token(0)), Source::Client(0));
        assert_eq!(Source::from_token(client_token(42)), Source::Client(42));
    }

    #[test]
    fn test_server_socket_classification() {
        assert!(Source::Listener.is_server_socket());
        assert!(Source::Udp.is_server_socket());
        assert!(!Source::Client(3).is_server_socket());
        assert_eq!(Source::Listener.label(), "tcp listener");
        assert_eq!(Source::Udp.label(), "udp");
    }
}
