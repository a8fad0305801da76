use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::CameraDriver;
use crate::error::CaptureFailure;

enum Step {
    Frame(Vec<u8>),
    Failure,
}

#[derive(Default)]
struct Script {
    steps: VecDeque<Step>,
    fallback: Option<Vec<u8>>,
    grabs: u64,
    returned: u64,
}

/// In-memory driver that replays a queued script of frames and failures.
///
/// Cloning yields another handle to the same script, so a test can keep one
/// handle while the [`FrameSource`](super::FrameSource) owns the other.
/// When the script runs dry the fallback frame (if any) is repeated,
/// otherwise `grab` fails with [`CaptureFailure::NoFrame`].
#[derive(Clone, Default)]
pub struct ScriptedCamera {
    script: Arc<Mutex<Script>>,
}

impl ScriptedCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// A camera that returns a copy of `frame` forever.
    pub fn repeating(frame: Vec<u8>) -> Self {
        let camera = Self::new();
        camera.script.lock().fallback = Some(frame);
        camera
    }

    pub fn push_frame(&self, frame: Vec<u8>) {
        self.script.lock().steps.push_back(Step::Frame(frame));
    }

    pub fn push_failure(&self) {
        self.script.lock().steps.push_back(Step::Failure);
    }

    /// Number of `grab` calls seen.
    pub fn grabs(&self) -> u64 {
        self.script.lock().grabs
    }

    /// Number of buffers handed back.
    pub fn returned(&self) -> u64 {
        self.script.lock().returned
    }
}

impl CameraDriver for ScriptedCamera {
    fn grab(&mut self) -> Result<Vec<u8>, CaptureFailure> {
        let mut script = self.script.lock();
        script.grabs += 1;
        match script.steps.pop_front() {
            Some(Step::Frame(frame)) => Ok(frame),
            Some(Step::Failure) => Err(CaptureFailure::NoFrame),
            None => script.fallback.clone().ok_or(CaptureFailure::NoFrame),
        }
    }

    fn give_back(&mut self, _buffer: Vec<u8>) {
        self.script.lock().returned += 1;
    }
}
