//! RTSP session control with RTP/JPEG delivery.
//!
//! One client at a time. Further connections wait in the listen backlog
//! until the current client tears down or disconnects.
//!
//! Media does not start on connect. RTP flows only after PLAY puts the
//! session in `Playing`, as UDP datagrams to the client port negotiated in
//! SETUP (`8000` when SETUP was skipped or carried no `client_port`). A
//! connected client that never sends PLAY receives no packets.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use super::StreamAdapter;
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::media::Packetizer;
use crate::media::mjpeg::JpegPacketizer;
use crate::protocol::sdp::describe_sdp;
use crate::protocol::{Response, RtspCommand, RtspMethod};
use crate::session::{SessionState, StreamSession, Transport, TransportHeader};
use crate::source::FrameSource;
use crate::transport::{DatagramSink, UdpTransport};
use crate::transport::tcp::{self, HeadReader, ReadOutcome};

/// Pause between consecutive RTP packets of one frame.
pub const PACKET_GAP: Duration = Duration::from_micros(100);

/// Answer to one request, plus whether the connection ends afterwards.
#[derive(Debug)]
pub struct RtspReply {
    pub response: Response,
    pub close: bool,
}

/// Build the reply for `cmd` and apply its effect on `session`.
///
/// `host` is the address advertised in the SDP origin line.
pub fn handle_command(
    session: &mut StreamSession,
    cmd: &RtspCommand,
    host: &str,
    rtsp_port: u16,
) -> RtspReply {
    let cseq = cmd.cseq;
    let session_id = session.id().to_string();

    let (response, close) = match cmd.method {
        Some(RtspMethod::Options) => (
            Response::rtsp_ok(cseq).add_header("Public", RtspMethod::PUBLIC),
            false,
        ),
        Some(RtspMethod::Describe) => {
            let sdp = describe_sdp(session.packetizer(), session.id(), host, rtsp_port);
            (
                Response::rtsp_ok(cseq)
                    .add_header("Content-Type", "application/sdp")
                    .with_body(sdp),
                false,
            )
        }
        Some(RtspMethod::Setup) => {
            let th = TransportHeader::parse_or_default(cmd.get_header("Transport"));
            let transport = Transport::for_peer(session.peer().ip(), &th);
            let value = transport.header_value();
            session.set_transport(transport);
            (
                Response::rtsp_ok(cseq)
                    .add_header("Session", &session_id)
                    .add_header("Transport", &value),
                false,
            )
        }
        Some(RtspMethod::Play) => {
            if session.transport().is_none() {
                tracing::debug!(session_id = session.id(), "PLAY before SETUP, using default client ports");
                let th = TransportHeader::parse_or_default(None);
                session.set_transport(Transport::for_peer(session.peer().ip(), &th));
            }
            session.set_state(SessionState::Playing);
            (
                Response::rtsp_ok(cseq)
                    .add_header("Session", &session_id)
                    .add_header("Range", "npt=0.000-"),
                false,
            )
        }
        Some(RtspMethod::Teardown) => (
            Response::rtsp_ok(cseq).add_header("Session", &session_id),
            true,
        ),
        None => (
            Response::rtsp(501, "Not Implemented").add_header("CSeq", &cseq.to_string()),
            false,
        ),
    };

    RtspReply { response, close }
}

struct RtspClient {
    stream: TcpStream,
    reader: HeadReader,
    local_ip: IpAddr,
    session: StreamSession,
}

pub struct RtspStreamAdapter {
    addr: SocketAddr,
    listener: Option<TcpListener>,
    udp: Option<UdpTransport>,
    client: Option<RtspClient>,
    timestamp_increment: u32,
    stall_timeout: Duration,
}

impl RtspStreamAdapter {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            addr: config.bind_addr(config.ports.rtsp),
            listener: None,
            udp: None,
            client: None,
            timestamp_increment: JpegPacketizer::timestamp_increment(config.frame_rate()),
            stall_timeout: config.stall_timeout(),
        }
    }

    /// `true` while a client is connected.
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.client.as_ref().is_some_and(|c| c.session.is_playing())
    }

    fn accept_client(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let Some(listener) = &self.listener else {
            return Err(StreamError::NotInitialized);
        };
        if let Some((stream, peer)) = tcp::accept_pending(listener)? {
            let local_ip = stream.local_addr()?.ip();
            tracing::info!(%peer, "rtsp client connected");
            self.client = Some(RtspClient {
                stream,
                reader: HeadReader::new(),
                local_ip,
                session: StreamSession::new(peer),
            });
        }
        Ok(())
    }

    /// Answer every complete request the client has sent.
    fn serve_requests(&mut self) -> Result<()> {
        let rtsp_port = self.addr.port();
        let Some(client) = self.client.as_mut() else {
            return Ok(());
        };

        loop {
            let head = match client.reader.poll(&mut client.stream) {
                Ok(ReadOutcome::Head(head)) => head,
                Ok(ReadOutcome::Pending) => return Ok(()),
                Ok(ReadOutcome::Closed) => {
                    tracing::info!(peer = %client.session.peer(), "rtsp client disconnected");
                    self.client = None;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(peer = %client.session.peer(), error = %e, "dropping rtsp client");
                    self.client = None;
                    return Err(e);
                }
            };

            if head.trim().is_empty() {
                continue;
            }
            let cmd = match RtspCommand::parse(&head) {
                Ok(cmd) => cmd,
                Err(e) => {
                    tracing::warn!(peer = %client.session.peer(), error = %e, "parse error");
                    continue;
                }
            };
            tracing::debug!(
                peer = %client.session.peer(),
                request = %cmd.request_line,
                cseq = cmd.cseq,
                "request"
            );

            let host = client.local_ip.to_string();
            let reply = handle_command(&mut client.session, &cmd, &host, rtsp_port);
            tracing::debug!(
                peer = %client.session.peer(),
                status = reply.response.status_code,
                "response"
            );

            let written = tcp::write_bounded(
                &mut client.stream,
                reply.response.serialize().as_bytes(),
                self.stall_timeout,
            );
            if reply.close || written.is_err() {
                tracing::info!(
                    peer = %client.session.peer(),
                    session_id = client.session.id(),
                    "rtsp session closed"
                );
                self.client = None;
                return Ok(());
            }
        }
    }

    fn send_frame(&mut self, source: &mut FrameSource) -> Result<()> {
        let Some(client) = self.client.as_mut() else {
            return Ok(());
        };
        if !client.session.is_playing() {
            return Ok(());
        }
        let Some(dest) = client.session.transport().map(|t| t.client_addr) else {
            return Ok(());
        };
        let udp = self.udp.as_ref().ok_or(StreamError::NotInitialized)?;

        let frame = source.acquire()?;
        let sequence = frame.sequence();
        let packets = client
            .session
            .packetizer_mut()
            .packetize(frame.data(), self.timestamp_increment);
        source.release(frame);

        send_packets(udp, dest, &packets, sequence)
    }
}

/// Send one frame's RTP packets to `dest`, [`PACKET_GAP`] apart.
///
/// A full send buffer abandons the rest of the frame with
/// [`StreamError::TransportStall`] carrying `frame`.
pub fn send_packets<S: DatagramSink + ?Sized>(
    sink: &S,
    dest: SocketAddr,
    packets: &[Vec<u8>],
    frame: u64,
) -> Result<()> {
    let total = packets.len();
    for (i, packet) in packets.iter().enumerate() {
        match sink.send_datagram(packet, dest) {
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::debug!(frame, sent = i, total, "rtp send buffer full");
                return Err(StreamError::TransportStall { frame });
            }
            Err(e) => return Err(e.into()),
        }
        if i + 1 < total {
            thread::sleep(PACKET_GAP);
        }
    }
    tracing::trace!(frame, packets = total, %dest, "rtp frame sent");
    Ok(())
}

impl StreamAdapter for RtspStreamAdapter {
    fn name(&self) -> &'static str {
        "rtsp"
    }

    fn initialize(&mut self) -> Result<()> {
        self.udp = Some(UdpTransport::bind_ephemeral()?);
        self.listener = Some(tcp::listen(self.addr)?);
        Ok(())
    }

    fn pump(&mut self, source: &mut FrameSource) -> Result<()> {
        self.accept_client()?;
        self.serve_requests()?;
        self.send_frame(source)
    }
}
