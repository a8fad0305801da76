//! Video protocol adapters.
//!
//! Every adapter is driven the same way by the video context:
//!
//! ```text
//! initialize()            once, binds sockets
//! loop {
//!     pump(&mut source)   accept/serve clients, send at most one frame
//!     pacer.wait_for_next_tick()
//! }
//! ```
//!
//! `pump` never blocks longer than the configured stall timeout and
//! returns every frame it acquired before returning. Errors are reported
//! to the scheduler, which logs them and keeps pumping.

pub mod http;
pub mod rtsp;
pub mod udp;
pub mod websocket;

use crate::config::{StreamConfig, VideoProtocol};
use crate::error::Result;
use crate::source::FrameSource;

pub use http::{HttpStreamAdapter, MultipartChunker};
pub use rtsp::RtspStreamAdapter;
pub use udp::UdpStreamAdapter;
pub use websocket::{SignalingState, WebSocketSignalingAdapter};

/// A wire protocol the video context can feed frames into.
pub trait StreamAdapter: Send {
    /// Short protocol name for logs.
    fn name(&self) -> &'static str;

    /// Bind listeners and sockets. Called once before the first `pump`.
    fn initialize(&mut self) -> Result<()>;

    /// One iteration of the video loop.
    fn pump(&mut self, source: &mut FrameSource) -> Result<()>;
}

/// The adapter selected at startup.
pub enum VideoAdapter {
    Http(HttpStreamAdapter),
    Rtsp(RtspStreamAdapter),
    Udp(UdpStreamAdapter),
    WebSocket(WebSocketSignalingAdapter),
}

impl VideoAdapter {
    pub fn from_config(config: &StreamConfig) -> Self {
        match config.video_protocol {
            VideoProtocol::Http => Self::Http(HttpStreamAdapter::new(config)),
            VideoProtocol::Rtsp => Self::Rtsp(RtspStreamAdapter::new(config)),
            VideoProtocol::Udp => Self::Udp(UdpStreamAdapter::new(config)),
            VideoProtocol::WebSocket => Self::WebSocket(WebSocketSignalingAdapter::new(config)),
        }
    }

    fn inner(&mut self) -> &mut dyn StreamAdapter {
        match self {
            Self::Http(a) => a,
            Self::Rtsp(a) => a,
            Self::Udp(a) => a,
            Self::WebSocket(a) => a,
        }
    }
}

impl StreamAdapter for VideoAdapter {
    fn name(&self) -> &'static str {
        match self {
            Self::Http(a) => a.name(),
            Self::Rtsp(a) => a.name(),
            Self::Udp(a) => a.name(),
            Self::WebSocket(a) => a.name(),
        }
    }

    fn initialize(&mut self) -> Result<()> {
        let adapter = self.inner();
        tracing::info!(protocol = adapter.name(), "initializing video adapter");
        adapter.initialize()
    }

    fn pump(&mut self, source: &mut FrameSource) -> Result<()> {
        self.inner().pump(source)
    }
}
