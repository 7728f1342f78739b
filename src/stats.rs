//! Server counters reported by the `/stats` command.

/// Monotonic connection and datagram counters.
///
/// Only the event loop mutates these, through the `record_*` methods, so
/// `total_*` never decrease and `current_tcp_clients` never underflows.
/// Fields are public so callers of [`crate::protocol::process_line`] can
/// hand in an arbitrary snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub total_tcp_clients: u64,
    pub current_tcp_clients: u64,
    pub total_udp_messages: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session was created for an accepted connection.
    pub fn record_accept(&mut self) {
        self.total_tcp_clients += 1;
        self.current_tcp_clients += 1;
    }

    /// A session was destroyed. Floors at zero.
    pub fn record_close(&mut self) {
        self.current_tcp_clients = self.current_tcp_clients.saturating_sub(1);
    }

    /// A datagram was received on the UDP socket.
    pub fn record_datagram(&mut self) {
        self.total_udp_messages += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_and_close() {
        let mut stats = Stats::new();
        stats.record_accept();
        stats.record_accept();
        stats.record_close();

        assert_eq!(stats.total_tcp_clients, 2);
        assert_eq!(stats.current_tcp_clients, 1);
    }

    #[test]
    fn test_close_floors_at_zero() {
        let mut stats = Stats::new();
        stats.record_close();
        assert_eq!(stats.current_tcp_clients, 0);
        assert_eq!(stats.total_tcp_clients, 0);
    }

    #[test]
    fn test_datagram_counter() {
        let mut stats = Stats::new();
        stats.record_datagram();
        stats.record_datagram();
        assert_eq!(stats.total_udp_messages, 2);
        assert_eq!(stats.current_tcp_clients, 0);
    }
}
