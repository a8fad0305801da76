use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use crate::error::Result;

/// Non-blocking UDP socket shared by RTP delivery, fragment broadcast and
/// the control receiver.
///
/// This layer is address-only: callers resolve sessions or broadcast
/// targets to socket addresses before calling [`send_to`](Self::send_to).
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind an ephemeral socket on all interfaces for outbound traffic.
    pub fn bind_ephemeral() -> Result<Self> {
        Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
    }

    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    pub fn enable_broadcast(&self) -> Result<()> {
        Ok(self.socket.set_broadcast(true)?)
    }

    /// Send one datagram. A full send buffer surfaces as
    /// [`io::ErrorKind::WouldBlock`] so callers can abandon the frame.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    /// Next queued datagram, or `None` when nothing is pending.
    pub fn try_recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// Anything datagrams can be sent through.
///
/// Implementations must not block: a full send buffer is reported as
/// [`io::ErrorKind::WouldBlock`].
pub trait DatagramSink {
    fn send_datagram(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize>;
}

impl DatagramSink for UdpTransport {
    fn send_datagram(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.send_to(payload, dest)
    }
}
