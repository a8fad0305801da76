//! Fragmented-frame datagram format for UDP broadcast.
//!
//! Each datagram is a 14-byte header followed by up to
//! [`MAX_FRAGMENT_SIZE`] payload bytes. All fields are big-endian:
//!
//! ```text
//!  0               4       6       8               12      14
//! +---------------+-------+-------+---------------+-------+-----------
//! | frame_number  | pkt # | total |  frame_size   | plen  | payload...
//! +---------------+-------+-------+---------------+-------+-----------
//!       u32          u16     u16         u32         u16
//! ```
//!
//! `total = ceil(frame_size / 1400)`; every fragment but the last carries
//! exactly 1400 bytes.

use crate::config::MAX_FRAGMENT_SIZE;
use crate::error::{Result, StreamError};

pub const FRAGMENT_HEADER_LEN: usize = 14;

/// Per-datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub frame_number: u32,
    pub packet_number: u16,
    pub total_packets: u16,
    pub frame_size: u32,
    pub payload_size: u16,
}

impl FragmentHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.frame_number.to_be_bytes());
        out.extend_from_slice(&self.packet_number.to_be_bytes());
        out.extend_from_slice(&self.total_packets.to_be_bytes());
        out.extend_from_slice(&self.frame_size.to_be_bytes());
        out.extend_from_slice(&self.payload_size.to_be_bytes());
    }

    /// Parse a header from the front of a datagram.
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let h = datagram.get(..FRAGMENT_HEADER_LEN)?;
        Some(Self {
            frame_number: u32::from_be_bytes([h[0], h[1], h[2], h[3]]),
            packet_number: u16::from_be_bytes([h[4], h[5]]),
            total_packets: u16::from_be_bytes([h[6], h[7]]),
            frame_size: u32::from_be_bytes([h[8], h[9], h[10], h[11]]),
            payload_size: u16::from_be_bytes([h[12], h[13]]),
        })
    }
}

/// A frame described as an ordered run of datagrams.
///
/// Borrows the frame bytes; it lives only for the duration of one send.
#[derive(Debug)]
pub struct FragmentedFrame<'a> {
    frame_number: u32,
    data: &'a [u8],
    total_packets: u16,
}

impl<'a> FragmentedFrame<'a> {
    pub fn new(frame_number: u32, data: &'a [u8]) -> Result<Self> {
        let total = data.len().div_ceil(MAX_FRAGMENT_SIZE);
        let total_packets =
            u16::try_from(total).map_err(|_| StreamError::FrameTooLarge { len: data.len() })?;
        if u32::try_from(data.len()).is_err() {
            return Err(StreamError::FrameTooLarge { len: data.len() });
        }
        Ok(Self {
            frame_number,
            data,
            total_packets,
        })
    }

    pub fn total_packets(&self) -> u16 {
        self.total_packets
    }

    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    /// Header for the fragment at `index`, or `None` past the last one.
    pub fn header(&self, index: u16) -> Option<FragmentHeader> {
        if index >= self.total_packets {
            return None;
        }
        let start = usize::from(index) * MAX_FRAGMENT_SIZE;
        let payload = (self.data.len() - start).min(MAX_FRAGMENT_SIZE);
        Some(FragmentHeader {
            frame_number: self.frame_number,
            packet_number: index,
            total_packets: self.total_packets,
            frame_size: self.data.len() as u32,
            payload_size: payload as u16,
        })
    }

    /// Encode the datagram for fragment `index` into `out` (cleared first)
    /// and return it. `None` past the last fragment; `out` is untouched.
    pub fn encode<'b>(&self, index: u16, out: &'b mut Vec<u8>) -> Option<&'b [u8]> {
        let header = self.header(index)?;
        let start = usize::from(index) * MAX_FRAGMENT_SIZE;
        let end = start + usize::from(header.payload_size);

        out.clear();
        out.reserve(FRAGMENT_HEADER_LEN + usize::from(header.payload_size));
        header.write(out);
        out.extend_from_slice(&self.data[start..end]);
        Some(out.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_thousand_bytes_make_three_fragments() {
        let data = vec![0xAB; 3000];
        let frame = FragmentedFrame::new(7, &data).unwrap();
        assert_eq!(frame.total_packets(), 3);

        let sizes: Vec<u16> = (0..3).map(|i| frame.header(i).unwrap().payload_size).collect();
        assert_eq!(sizes, vec![1400, 1400, 200]);
    }

    #[test]
    fn payload_sizes_sum_to_frame_length() {
        for len in [1usize, 1399, 1400, 1401, 2800, 2801, 65_000, 100_003] {
            let data = vec![1u8; len];
            let frame = FragmentedFrame::new(1, &data).unwrap();
            let total = frame.total_packets();
            assert_eq!(usize::from(total), len.div_ceil(1400), "len {len}");

            let sum: usize = (0..total)
                .map(|i| usize::from(frame.header(i).unwrap().payload_size))
                .sum();
            assert_eq!(sum, len);

            let last = frame.header(total - 1).unwrap().payload_size as usize;
            assert_eq!(last, len - (usize::from(total) - 1) * 1400);
        }
    }

    #[test]
    fn header_is_big_endian() {
        let data: Vec<u8> = (0..1500u32).map(|i| i as u8).collect();
        let frame = FragmentedFrame::new(0x01020304, &data).unwrap();
        let mut out = Vec::new();
        assert!(frame.encode(1, &mut out).is_some());

        assert_eq!(
            &out[..FRAGMENT_HEADER_LEN],
            &[1, 2, 3, 4, 0, 1, 0, 2, 0, 0, 0x05, 0xDC, 0, 100]
        );
        assert_eq!(&out[FRAGMENT_HEADER_LEN..], &data[1400..]);
        assert_eq!(FragmentHeader::parse(&out), frame.header(1));
    }

    #[test]
    fn empty_frame_has_no_fragments() {
        let frame = FragmentedFrame::new(1, &[]).unwrap();
        assert_eq!(frame.total_packets(), 0);
        assert_eq!(frame.header(0), None);
    }

    #[test]
    fn index_past_last_fragment_is_none() {
        let data = vec![0u8; 3000];
        let frame = FragmentedFrame::new(1, &data).unwrap();
        assert!(frame.header(2).is_some());
        assert_eq!(frame.header(3), None);
        assert_eq!(frame.header(u16::MAX), None);

        let mut out = vec![0xEE; 4];
        assert!(frame.encode(3, &mut out).is_none());
        assert_eq!(out, vec![0xEE; 4]);
    }

    #[test]
    fn oversized_frame_rejected() {
        let data = vec![0u8; 1400 * 65_536];
        assert!(matches!(
            FragmentedFrame::new(1, &data),
            Err(StreamError::FrameTooLarge { .. })
        ));
    }
}
