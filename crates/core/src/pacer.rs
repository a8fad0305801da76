use std::thread;
use std::time::Duration;

/// Fixed-interval frame pacing.
///
/// Every tick sleeps the full interval no matter how long the preceding
/// send took. There is no drift compensation: a slow iteration is never
/// followed by a catch-up burst, so the achieved rate only ever falls
/// below the target.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    ticks: u64,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, ticks: 0 }
    }

    /// Yield the calling context for one interval.
    pub fn wait_for_next_tick(&mut self) {
        self.ticks += 1;
        if !self.interval.is_zero() {
            thread::sleep(self.interval);
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
