//! Camera frame acquisition.
//!
//! The camera driver owns the pixel buffers. [`FrameSource`] checks one
//! buffer out at a time as a [`Frame`] and hands it back on
//! [`release`](FrameSource::release):
//!
//! ```text
//! acquire() ──► Frame (exclusively owned) ──► release(frame)
//!    │                                            │
//!    └─ driver.grab()                 driver.give_back(buf)
//! ```
//!
//! `release` consumes the `Frame`, so a frame can only be returned once.
//! Only the video context calls into a `FrameSource`; it is not `Sync`
//! and needs no locking.

pub mod scripted;
pub mod synthetic;

use std::thread;
use std::time::{Duration, Instant};

use crate::config::CaptureBackoff;
use crate::error::CaptureFailure;

pub use scripted::ScriptedCamera;
pub use synthetic::SyntheticCamera;

/// Hardware camera capability.
///
/// `grab` may block for as long as the sensor needs (bounded by the
/// driver). Every buffer returned by `grab` comes back exactly once through
/// `give_back`, so a driver may recycle a fixed pool.
pub trait CameraDriver: Send {
    fn grab(&mut self) -> Result<Vec<u8>, CaptureFailure>;
    fn give_back(&mut self, buffer: Vec<u8>);
}

/// One captured image, checked out from a [`FrameSource`].
#[derive(Debug)]
#[must_use = "frames must be returned with FrameSource::release"]
pub struct Frame {
    data: Vec<u8>,
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Capture counter, starting at 1 for the first successful acquire.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

/// Counts consecutive capture failures and decides when to cool down.
#[derive(Debug, Clone)]
pub struct FailureCounter {
    threshold: u32,
    consecutive: u32,
    cooldowns: u64,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
            cooldowns: 0,
        }
    }

    /// Record a failure. Returns `true` when the threshold is reached; the
    /// counter is reset at that point.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        if self.consecutive >= self.threshold {
            self.consecutive = 0;
            self.cooldowns += 1;
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Number of cooldowns taken so far.
    pub fn cooldowns(&self) -> u64 {
        self.cooldowns
    }
}

/// Single-owner wrapper around a [`CameraDriver`].
pub struct FrameSource {
    driver: Box<dyn CameraDriver>,
    failures: FailureCounter,
    cooldown: Duration,
    outstanding: bool,
    captured: u64,
    last_capture_time: Duration,
}

impl FrameSource {
    pub fn new(driver: Box<dyn CameraDriver>, backoff: &CaptureBackoff) -> Self {
        Self {
            driver,
            failures: FailureCounter::new(backoff.failure_threshold),
            cooldown: backoff.cooldown(),
            outstanding: false,
            captured: 0,
            last_capture_time: Duration::ZERO,
        }
    }

    /// Check out the next frame.
    ///
    /// On the threshold-th consecutive driver failure this sleeps for the
    /// configured cooldown before returning the failure.
    pub fn acquire(&mut self) -> Result<Frame, CaptureFailure> {
        if self.outstanding {
            return Err(CaptureFailure::FrameOutstanding);
        }

        let started = Instant::now();
        let grabbed = self.driver.grab();
        self.last_capture_time = started.elapsed();

        match grabbed {
            Ok(data) => {
                self.failures.record_success();
                self.outstanding = true;
                self.captured += 1;
                tracing::trace!(sequence = self.captured, len = data.len(), "frame acquired");
                Ok(Frame {
                    data,
                    sequence: self.captured,
                    captured_at: Instant::now(),
                })
            }
            Err(failure) => {
                tracing::warn!(
                    error = %failure,
                    consecutive = self.failures.consecutive() + 1,
                    "camera capture failed"
                );
                if self.failures.record_failure() {
                    tracing::warn!(cooldown_ms = self.cooldown.as_millis() as u64, "capture cooldown");
                    thread::sleep(self.cooldown);
                }
                Err(failure)
            }
        }
    }

    /// Return a frame to the driver.
    pub fn release(&mut self, frame: Frame) {
        self.outstanding = false;
        self.driver.give_back(frame.data);
    }

    pub fn has_outstanding(&self) -> bool {
        self.outstanding
    }

    pub fn failures(&self) -> &FailureCounter {
        &self.failures
    }

    /// Time the driver spent in the most recent `grab`.
    pub fn last_capture_time(&self) -> Duration {
        self.last_capture_time
    }

    /// Total frames successfully acquired.
    pub fn captured(&self) -> u64 {
        self.captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(threshold: u32) -> CaptureBackoff {
        CaptureBackoff {
            failure_threshold: threshold,
            cooldown_ms: 0,
        }
    }

    #[test]
    fn acquire_release_cycle() {
        let camera = ScriptedCamera::new();
        camera.push_frame(vec![1, 2, 3]);
        let mut source = FrameSource::new(Box::new(camera.clone()), &backoff(5));

        let frame = source.acquire().unwrap();
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.sequence(), 1);
        assert!(source.has_outstanding());

        source.release(frame);
        assert!(!source.has_outstanding());
        assert_eq!(camera.returned(), 1);
    }

    #[test]
    fn second_acquire_refused_while_outstanding() {
        let camera = ScriptedCamera::new();
        camera.push_frame(vec![0; 10]);
        camera.push_frame(vec![0; 10]);
        let mut source = FrameSource::new(Box::new(camera.clone()), &backoff(5));

        let frame = source.acquire().unwrap();
        assert_eq!(source.acquire().unwrap_err(), CaptureFailure::FrameOutstanding);
        assert_eq!(camera.grabs(), 1, "driver must not be called while a frame is out");
        source.release(frame);
        let frame = source.acquire().unwrap();
        source.release(frame);
    }

    #[test]
    fn five_failures_trigger_one_cooldown() {
        let camera = ScriptedCamera::new();
        for _ in 0..5 {
            camera.push_failure();
        }
        camera.push_frame(vec![9; 4]);
        let mut source = FrameSource::new(Box::new(camera), &backoff(5));

        for i in 1..=4 {
            assert!(source.acquire().is_err());
            assert_eq!(source.failures().consecutive(), i);
            assert_eq!(source.failures().cooldowns(), 0);
        }
        assert!(source.acquire().is_err());
        assert_eq!(source.failures().cooldowns(), 1);
        assert_eq!(source.failures().consecutive(), 0);

        let frame = source.acquire().unwrap();
        assert_eq!(frame.len(), 4);
        source.release(frame);
    }

    #[test]
    fn success_resets_failure_count() {
        let mut counter = FailureCounter::new(5);
        for _ in 0..4 {
            assert!(!counter.record_failure());
        }
        counter.record_success();
        for _ in 0..4 {
            assert!(!counter.record_failure());
        }
        assert!(counter.record_failure());
        assert_eq!(counter.cooldowns(), 1);
    }
}
