use std::io;
use std::net::{IpAddr, SocketAddr};
use std::thread;
use std::time::Duration;

use super::StreamAdapter;
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::media::fragment::FragmentedFrame;
use crate::source::FrameSource;
use crate::transport::{DatagramSink, UdpTransport};

/// Pause between datagrams of one frame.
pub const PACKET_GAP: Duration = Duration::from_micros(100);

/// Fire-and-forget broadcast of fragmented frames.
///
/// Every pump captures one frame and sends it as
/// [`FragmentedFrame`] datagrams to `broadcast_addr:udp_video`. There are
/// no clients, acknowledgements or retransmissions.
pub struct UdpStreamAdapter {
    bind: SocketAddr,
    dest: SocketAddr,
    socket: Option<UdpTransport>,
    next_frame_number: u32,
    datagram: Vec<u8>,
}

impl UdpStreamAdapter {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            bind: config.bind_addr(0),
            dest: SocketAddr::new(IpAddr::V4(config.broadcast_addr), config.ports.udp_video),
            socket: None,
            next_frame_number: 1,
            datagram: Vec::new(),
        }
    }

    /// Frame number the next broadcast frame will carry.
    pub fn next_frame_number(&self) -> u32 {
        self.next_frame_number
    }

    pub fn destination(&self) -> SocketAddr {
        self.dest
    }
}

impl StreamAdapter for UdpStreamAdapter {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn initialize(&mut self) -> Result<()> {
        let socket = UdpTransport::bind(self.bind)?;
        socket.enable_broadcast()?;
        tracing::info!(dest = %self.dest, "udp video broadcast ready");
        self.socket = Some(socket);
        Ok(())
    }

    fn pump(&mut self, source: &mut FrameSource) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(StreamError::NotInitialized)?;
        let frame = source.acquire()?;
        let sequence = frame.sequence();

        let frame_number = self.next_frame_number;
        self.next_frame_number = self.next_frame_number.wrapping_add(1);

        let result = send_fragments(
            socket,
            self.dest,
            &mut self.datagram,
            frame_number,
            frame.data(),
            sequence,
        );
        source.release(frame);
        result
    }
}

/// Send `data` as numbered fragments to `dest`, reusing `datagram` as the
/// encode buffer. `WouldBlock` abandons the rest of the frame.
pub fn send_fragments<S: DatagramSink + ?Sized>(
    sink: &S,
    dest: SocketAddr,
    datagram: &mut Vec<u8>,
    frame_number: u32,
    data: &[u8],
    sequence: u64,
) -> Result<()> {
    let fragments = FragmentedFrame::new(frame_number, data)?;
    let total = fragments.total_packets();
    for index in 0..total {
        let Some(payload) = fragments.encode(index, datagram) else {
            break;
        };
        match sink.send_datagram(payload, dest) {
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::debug!(frame_number, sent = index, total, "udp send buffer full");
                return Err(StreamError::TransportStall { frame: sequence });
            }
            Err(e) => return Err(e.into()),
        }
        if index + 1 < total {
            thread::sleep(PACKET_GAP);
        }
    }
    tracing::trace!(frame_number, packets = total, len = data.len(), "frame broadcast");
    Ok(())
}
