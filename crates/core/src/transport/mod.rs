//! Socket plumbing shared by the adapters and control receivers.
//!
//! - **TCP** ([`tcp`]): non-blocking listeners for the HTTP and RTSP
//!   surfaces, a request reader and bounded writes. Nothing here ever
//!   parks a context longer than the configured stall timeout.
//! - **UDP** ([`udp`]): one non-blocking socket type for RTP delivery,
//!   fragment broadcast and control datagrams.
//! - **WebSocket** ([`ws`]): a listener on an owned current-thread runtime,
//!   polled in short windows from a synchronous context.

pub mod tcp;
pub mod udp;
pub mod ws;

pub use tcp::{HeadReader, ReadOutcome};
pub use udp::{DatagramSink, UdpTransport};
pub use ws::WsListener;
