/// Fixed RTP header builder (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// - **Sequence number**: 16-bit, wrapping, incremented on every packet.
/// - **Timestamp**: 32-bit, wrapping, advanced once per frame.
/// - **Second byte**: marker bit and payload type as one fixed byte; the
///   marker is never toggled per packet.
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpHeader {
    /// Marker bit and payload type, written verbatim.
    pub marker_payload: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

/// First header byte: V=2, P=0, X=0, CC=0.
pub const RTP_VERSION_BYTE: u8 = 0x80;

/// Length of the fixed header.
pub const RTP_HEADER_LEN: usize = 12;

impl RtpHeader {
    pub fn new(marker_payload: u8, ssrc: u32) -> Self {
        tracing::debug!(
            marker_payload,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            marker_payload,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Sequence number the next [`write`](Self::write) will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Serialize a 12-byte header and advance the sequence number.
    pub fn write(&mut self) -> [u8; RTP_HEADER_LEN] {
        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = RTP_VERSION_BYTE;
        header[1] = self.marker_payload;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Advance the RTP timestamp by one frame's worth of clock ticks
    /// (`clock_rate / fps`, e.g. 3000 at 90 kHz and 30 fps).
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> RtpHeader {
        RtpHeader::new(0x1A, 0x12345678)
    }

    #[test]
    fn first_bytes_fixed() {
        let mut h = make_header();
        let buf = h.write();
        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[0] >> 6, 2);
        assert_eq!(buf[1], 0x1A);
    }

    #[test]
    fn sequence_increments() {
        let mut h = make_header();
        let b1 = h.write();
        let seq1 = u16::from_be_bytes([b1[2], b1[3]]);
        let b2 = h.write();
        let seq2 = u16::from_be_bytes([b2[2], b2[3]]);
        assert_eq!(seq2, seq1 + 1);
    }

    #[test]
    fn sequence_wraps() {
        let mut h = make_header();
        h.sequence = u16::MAX;
        let buf = h.write();
        let seq = u16::from_be_bytes([buf[2], buf[3]]);
        assert_eq!(seq, u16::MAX);
        assert_eq!(h.sequence(), 0);
    }

    #[test]
    fn ssrc_written() {
        let mut h = make_header();
        let buf = h.write();
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        assert_eq!(ssrc, 0x12345678);
    }

    #[test]
    fn timestamp_wraps() {
        let mut h = make_header();
        h.timestamp = u32::MAX - 999;
        h.advance_timestamp(3000);
        assert_eq!(h.timestamp(), 2000);
    }
}
