use super::CameraDriver;
use crate::config::CameraSettings;
use crate::error::CaptureFailure;

/// Number of driver-owned frame buffers.
const BUFFER_COUNT: usize = 2;

/// Largest payload a single JPEG COM segment can carry.
const MAX_COM_PAYLOAD: usize = 65533;

/// Minimal valid baseline JPEG, a single grey pixel.
const BASE_JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xDB, 0x00, 0x43, 0x00, 0x08, 0x06, 0x06, 0x07, 0x06,
    0x05, 0x08, 0x07, 0x07, 0x07, 0x09, 0x09, 0x08, 0x0A, 0x0C, 0x14, 0x0D, 0x0C, 0x0B, 0x0B,
    0x0C, 0x19, 0x12, 0x13, 0x0F, 0x14, 0x1D, 0x1A, 0x1F, 0x1E, 0x1D, 0x1A, 0x1C, 0x1C, 0x20,
    0x24, 0x2E, 0x27, 0x20, 0x22, 0x2C, 0x23, 0x1C, 0x1C, 0x28, 0x37, 0x29, 0x2C, 0x30, 0x31,
    0x34, 0x34, 0x34, 0x1F, 0x27, 0x39, 0x3D, 0x38, 0x32, 0x3C, 0x2E, 0x33, 0x34, 0x32, 0xFF,
    0xC0, 0x00, 0x0B, 0x08, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11, 0x00, 0xFF, 0xC4, 0x00,
    0x1F, 0x00, 0x00, 0x01, 0x05, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B,
    0xFF, 0xC4, 0x00, 0xB5, 0x10, 0x00, 0x02, 0x01, 0x03, 0x03, 0x02, 0x04, 0x03, 0x05, 0x05,
    0x04, 0x04, 0x00, 0x00, 0x01, 0x7D, 0x01, 0x02, 0x03, 0x00, 0x04, 0x11, 0x05, 0x12, 0x21,
    0x31, 0x41, 0x06, 0x13, 0x51, 0x61, 0x07, 0x22, 0x71, 0x14, 0x32, 0x81, 0x91, 0xA1, 0x08,
    0x23, 0x42, 0xB1, 0xC1, 0x15, 0x52, 0xD1, 0xF0, 0x24, 0x33, 0x62, 0x72, 0x82, 0x09, 0x0A,
    0x16, 0x17, 0x18, 0x19, 0x1A, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2A, 0x34, 0x35, 0x36, 0x37,
    0x38, 0x39, 0x3A, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4A, 0x53, 0x54, 0x55, 0x56,
    0x57, 0x58, 0x59, 0x5A, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6A, 0x73, 0x74, 0x75,
    0x76, 0x77, 0x78, 0x79, 0x7A, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8A, 0x92, 0x93,
    0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9A, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9,
    0xAA, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7, 0xB8, 0xB9, 0xBA, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6,
    0xC7, 0xC8, 0xC9, 0xCA, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA, 0xE1, 0xE2,
    0xE3, 0xE4, 0xE5, 0xE6, 0xE7, 0xE8, 0xE9, 0xEA, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7,
    0xF8, 0xF9, 0xFA, 0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, 0x7B, 0x94,
    0x11, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xD9,
];

/// Test-pattern camera for running the pipeline without a sensor.
///
/// In JPEG mode each frame is a decodable 1x1 JPEG padded with COM
/// segments to roughly the size a real encoder would produce for the
/// configured resolution and quality; the first COM segment carries the
/// frame counter. In raw mode frames are RGB565 gradients of the full
/// resolution.
///
/// Buffers come from a fixed pool of two and are reused.
pub struct SyntheticCamera {
    settings: CameraSettings,
    pool: Vec<Vec<u8>>,
    counter: u64,
}

impl SyntheticCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            pool: (0..BUFFER_COUNT).map(|_| Vec::new()).collect(),
            counter: 0,
        }
    }

    /// Approximate compressed size for the configured resolution/quality.
    fn jpeg_target_len(&self) -> usize {
        let (w, h) = self.settings.resolution.dimensions();
        let pixels = (w * h) as usize;
        let divisor = 8 + usize::from(self.settings.quality);
        (pixels / divisor).max(BASE_JPEG.len())
    }

    fn fill_jpeg(&self, buf: &mut Vec<u8>) {
        let target = self.jpeg_target_len();
        let mut padding = target.saturating_sub(BASE_JPEG.len());

        buf.extend_from_slice(&BASE_JPEG[..2]);

        let tag = format!("camstream frame {}", self.counter);
        let mut first = true;
        while first || padding > 0 {
            let body = padding.clamp(tag.len(), MAX_COM_PAYLOAD);
            buf.extend_from_slice(&[0xFF, 0xFE]);
            buf.extend_from_slice(&((body + 2) as u16).to_be_bytes());
            let start = buf.len();
            if first {
                buf.extend_from_slice(tag.as_bytes());
            }
            buf.resize(start + body, b' ');
            padding = padding.saturating_sub(body + 4);
            first = false;
        }

        buf.extend_from_slice(&BASE_JPEG[2..]);
    }

    fn fill_raw(&self, buf: &mut Vec<u8>) {
        let (w, h) = self.settings.resolution.dimensions();
        let shift = (self.counter % 32) as u32;
        for y in 0..h {
            for x in 0..w {
                let r = ((x * 32 / w) + shift) % 32;
                let g = (y * 64 / h) % 64;
                let b = shift;
                let px = ((r as u16) << 11) | ((g as u16) << 5) | b as u16;
                buf.extend_from_slice(&px.to_le_bytes());
            }
        }
    }
}

impl CameraDriver for SyntheticCamera {
    fn grab(&mut self) -> Result<Vec<u8>, CaptureFailure> {
        let mut buf = self.pool.pop().ok_or(CaptureFailure::NoFrame)?;
        buf.clear();
        self.counter += 1;
        if self.settings.raw_mode {
            self.fill_raw(&mut buf);
        } else {
            self.fill_jpeg(&mut buf);
        }
        Ok(buf)
    }

    fn give_back(&mut self, buffer: Vec<u8>) {
        if self.pool.len() < BUFFER_COUNT {
            self.pool.push(buffer);
        }
    }
}
