//! TCP listener and UDP socket setup.
//!
//! Both sockets are created with socket2 so address reuse and the backlog
//! can be set before binding, then handed to mio in non-blocking mode.
//! The UDP socket binds the port the TCP listener actually received, which
//! matters when the configured port is 0.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};

/// Create a non-blocking TCP listener with `SO_REUSEADDR`.
pub fn bind_tcp(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Create a non-blocking UDP socket with `SO_REUSEADDR`.
pub fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Bind the listener, then a UDP socket on the same port.
///
/// If the UDP bind fails the listener is dropped, so nothing stays open.
pub fn bind_pair(addr: SocketAddr, backlog: u32) -> io::Result<(TcpListener, UdpSocket)> {
    let listener = bind_tcp(addr, backlog)?;
    let udp_addr = SocketAddr::new(addr.ip(), listener.local_addr()?.port());
    let udp = bind_udp(udp_addr)?;
    Ok((listener, udp))
}
