//! Per-client stream sessions.
//!
//! Each connection-oriented adapter (RTSP, WebSocket) serves at most one
//! client at a time and owns exactly one [`StreamSession`] for it. The
//! session is created when the client connects and dropped when it tears
//! down or disconnects; a reconnect gets a fresh id and fresh RTP counters.
//!
//! ## RTSP lifecycle
//!
//! ```text
//! connect   -> Init
//! SETUP     -> Ready
//! PLAY      -> Playing
//! TEARDOWN  -> (dropped)
//! ```

pub mod transport;

use std::net::SocketAddr;

use rand::RngExt;

use crate::media::Packetizer;
use crate::media::mjpeg::JpegPacketizer;
pub use transport::{Transport, TransportHeader};

/// Session ids are drawn from `0..SESSION_ID_RANGE`.
pub const SESSION_ID_RANGE: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no SETUP yet.
    Init,
    /// Transport negotiated, not yet playing.
    Ready,
    /// Media is being delivered.
    Playing,
}

/// One client's session: id, RTP counters and negotiated transport.
#[derive(Debug)]
pub struct StreamSession {
    id: u32,
    peer: SocketAddr,
    state: SessionState,
    transport: Option<Transport>,
    packetizer: JpegPacketizer,
}

impl StreamSession {
    pub fn new(peer: SocketAddr) -> Self {
        let id = rand::rng().random_range(0..SESSION_ID_RANGE);
        tracing::debug!(session_id = id, %peer, "session created");
        Self {
            id,
            peer,
            state: SessionState::Init,
            transport: None,
            packetizer: JpegPacketizer::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        tracing::debug!(session_id = self.id, old_state = ?self.state, new_state = ?state, "state transition");
        self.state = state;
    }

    pub fn is_playing(&self) -> bool {
        self.state == SessionState::Playing
    }

    /// Record the transport negotiated during SETUP.
    pub fn set_transport(&mut self, transport: Transport) {
        tracing::debug!(session_id = self.id, client_addr = %transport.client_addr, "transport configured");
        self.transport = Some(transport);
        self.state = SessionState::Ready;
    }

    pub fn transport(&self) -> Option<&Transport> {
        self.transport.as_ref()
    }

    pub fn packetizer(&self) -> &JpegPacketizer {
        &self.packetizer
    }

    pub fn packetizer_mut(&mut self) -> &mut JpegPacketizer {
        &mut self.packetizer
    }

    /// Sequence number the next RTP packet will carry.
    pub fn sequence_number(&self) -> u16 {
        self.packetizer.next_sequence()
    }

    /// RTP timestamp of the next frame.
    pub fn timestamp(&self) -> u32 {
        self.packetizer.next_rtp_timestamp()
    }
}
