//! Fixed-size JPEG RTP packetizer.
//!
//! A reduced profile of RFC 2435: each frame is cut into consecutive
//! fragments of at most [`MAX_FRAGMENT_SIZE`] bytes and each fragment is
//! prefixed with the 12-byte RTP header. There is no JPEG payload header
//! (type/Q/width/height/offset), so receivers reassemble by sequence
//! number and timestamp. The second header byte is the fixed value
//! [`JPEG_MARKER_PAYLOAD`] on every packet.

use super::Packetizer;
use super::rtp::{RTP_HEADER_LEN, RtpHeader};
use crate::config::MAX_FRAGMENT_SIZE;

/// Static payload type for JPEG (RFC 3551).
pub const JPEG_PAYLOAD_TYPE: u8 = 26;

/// Marker bit clear, payload type 26.
pub const JPEG_MARKER_PAYLOAD: u8 = JPEG_PAYLOAD_TYPE;

/// SSRC used by the device stream.
pub const DEFAULT_SSRC: u32 = 0x1234_5678;

/// Video clock rate in Hz (RFC 3551 §4).
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

#[derive(Debug)]
pub struct JpegPacketizer {
    header: RtpHeader,
    fragment_size: usize,
}

impl JpegPacketizer {
    pub fn new(ssrc: u32) -> Self {
        Self {
            header: RtpHeader::new(JPEG_MARKER_PAYLOAD, ssrc),
            fragment_size: MAX_FRAGMENT_SIZE,
        }
    }

    /// Timestamp advance per frame for the given frame rate.
    pub fn timestamp_increment(frame_rate: u32) -> u32 {
        VIDEO_CLOCK_RATE / frame_rate.max(1)
    }
}

impl Default for JpegPacketizer {
    fn default() -> Self {
        Self::new(DEFAULT_SSRC)
    }
}

impl Packetizer for JpegPacketizer {
    fn packetize(&mut self, frame: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>> {
        let packets = frame
            .chunks(self.fragment_size)
            .map(|chunk| {
                let hdr = self.header.write();
                let mut packet = Vec::with_capacity(RTP_HEADER_LEN + chunk.len());
                packet.extend_from_slice(&hdr);
                packet.extend_from_slice(chunk);
                packet
            })
            .collect();

        self.header.advance_timestamp(timestamp_increment);
        packets
    }

    fn codec_name(&self) -> &'static str {
        "JPEG"
    }

    fn clock_rate(&self) -> u32 {
        VIDEO_CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        JPEG_PAYLOAD_TYPE
    }

    fn sdp_attributes(&self) -> Vec<String> {
        vec![
            format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type(),
                self.codec_name(),
                self.clock_rate()
            ),
            "a=control:trackID=0".to_string(),
        ]
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.header.timestamp()
    }
}
