use std::net::SocketAddr;

use super::{ACK, CONTROL_BUFFER_SIZE, ControlState, ControlTransport, ControlUpdate};
use crate::error::Result;
use crate::transport::UdpTransport;

/// JSON control commands over UDP.
///
/// Datagrams longer than [`CONTROL_BUFFER_SIZE`] are truncated and fail to
/// decode. Each valid datagram is acknowledged to its sender with [`ACK`].
/// Malformed datagrams are logged and dropped without a reply.
pub struct UdpControlReceiver {
    socket: UdpTransport,
    buf: Vec<u8>,
}

impl UdpControlReceiver {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpTransport::bind(addr)?;
        tracing::info!(%addr, "control receiver listening");
        Ok(Self {
            socket,
            buf: vec![0; CONTROL_BUFFER_SIZE],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Next valid command, or `None` once the socket queue is empty.
    pub fn recv_update(&mut self) -> Result<Option<ControlUpdate>> {
        while let Some((len, from)) = self.socket.try_recv_from(&mut self.buf)? {
            tracing::trace!(%from, len, "control datagram");
            match ControlUpdate::from_json(&self.buf[..len]) {
                Ok(update) => {
                    if let Err(e) = self.socket.send_to(ACK.as_bytes(), from) {
                        tracing::debug!(%from, error = %e, "control ack failed");
                    }
                    return Ok(Some(update));
                }
                Err(e) => {
                    tracing::warn!(%from, error = %e, "malformed control datagram");
                }
            }
        }
        Ok(None)
    }
}

impl ControlTransport for UdpControlReceiver {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn poll(&mut self, _state: &ControlState) -> Result<Option<ControlUpdate>> {
        self.recv_update()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::time::Duration;

    #[test]
    fn valid_datagram_is_decoded_and_acked() {
        let mut receiver = UdpControlReceiver::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let target = receiver.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        client.send_to(b"not json", target).unwrap();
        client.send_to(br#"{"pan":42}"#, target).unwrap();

        let mut update = None;
        for _ in 0..200 {
            update = receiver.recv_update().unwrap();
            if update.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(update.unwrap().pan, Some(42.0));

        let mut buf = [0u8; 64];
        let (n, _) = client.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], ACK.as_bytes());
    }
}
