//! Frame packetization for the datagram transports.
//!
//! Two wire formats split a frame into MTU-safe pieces of at most
//! [`MAX_FRAGMENT_SIZE`](crate::config::MAX_FRAGMENT_SIZE) payload bytes:
//!
//! | Format | Module | Header |
//! |--------|--------|--------|
//! | RTP (RTSP sessions) | [`rtp`], [`mjpeg`] | 12-byte RTP fixed header |
//! | Fragmented UDP broadcast | [`fragment`] | 14-byte frame/packet header |
//!
//! Both headers are written in network byte order. The byte layout is part
//! of the contract with receivers and must not change.

pub mod fragment;
pub mod mjpeg;
pub mod rtp;

/// RTP packetizer for one media stream.
///
/// The generic RTP header is handled by [`rtp::RtpHeader`]; packetizers
/// compose it rather than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Split one encoded frame into complete RTP packets (header + payload)
    /// and advance the timestamp by `timestamp_increment` afterwards.
    fn packetize(&mut self, frame: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>>;

    /// Codec name for the SDP `a=rtpmap` attribute.
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8;

    /// SDP media-level attribute lines, including the `a=` prefix.
    fn sdp_attributes(&self) -> Vec<String>;

    /// Sequence number of the next packet.
    fn next_sequence(&self) -> u16;

    /// Timestamp of the next frame.
    fn next_rtp_timestamp(&self) -> u32;
}
