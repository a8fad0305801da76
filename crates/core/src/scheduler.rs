use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use core_affinity::CoreId;

use crate::adapter::{StreamAdapter, VideoAdapter};
use crate::config::{ControlProtocol, StreamConfig};
use crate::control::{
    Actuator, ControlLoop, ControlTransport, HttpControlReceiver, UdpControlReceiver,
    WsControlReceiver,
};
use crate::error::{Result, StreamError};
use crate::pacer::FramePacer;
use crate::source::{CameraDriver, FrameSource};

/// Minimal yield between iterations of either context.
pub const LOOP_YIELD: Duration = Duration::from_millis(1);

/// Core index of the video context; the control context takes the next.
pub const VIDEO_CORE: usize = 0;
pub const CONTROL_CORE: usize = 1;

/// Core for the context at `index`. Pinning needs one core per context,
/// so nothing is chosen on a single-core machine.
pub fn pick_core(cores: &[CoreId], index: usize) -> Option<CoreId> {
    if cores.len() < 2 {
        return None;
    }
    cores.get(index).copied()
}

fn pin_current_thread(core: Option<CoreId>) {
    let name = thread::current().name().unwrap_or("?").to_string();
    match core {
        Some(core) if core_affinity::set_for_current(core) => {
            tracing::debug!(thread = %name, core = core.id, "context pinned");
        }
        Some(core) => tracing::warn!(thread = %name, core = core.id, "could not pin context"),
        None => tracing::debug!(thread = %name, "context left unpinned"),
    }
}

/// Everything the video thread owns: the camera, the adapter and the pacer.
pub struct VideoContext<A: StreamAdapter = VideoAdapter> {
    source: FrameSource,
    adapter: A,
    pacer: FramePacer,
    metrics_enabled: bool,
}

impl VideoContext<VideoAdapter> {
    /// Build the context for the protocol selected in `config`.
    pub fn from_config(config: &StreamConfig, driver: Box<dyn CameraDriver>) -> Self {
        Self::new(
            FrameSource::new(driver, &config.capture),
            VideoAdapter::from_config(config),
            FramePacer::new(config.frame_interval()),
            config.metrics_enabled,
        )
    }
}

impl<A: StreamAdapter> VideoContext<A> {
    pub fn new(source: FrameSource, adapter: A, pacer: FramePacer, metrics_enabled: bool) -> Self {
        Self {
            source,
            adapter,
            pacer,
            metrics_enabled,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    /// One pump of the adapter. Errors are logged, never propagated.
    pub fn run_once(&mut self) {
        let captured_before = self.source.captured();
        let started = Instant::now();
        let result = self.adapter.pump(&mut self.source);
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {}
            Err(StreamError::Capture(failure)) => {
                tracing::trace!(error = %failure, "no frame this tick");
            }
            Err(e @ StreamError::TransportStall { .. }) => {
                tracing::warn!(protocol = self.adapter.name(), error = %e, "frame abandoned");
            }
            Err(e) => {
                tracing::warn!(protocol = self.adapter.name(), error = %e, "pump failed");
            }
        }

        if self.metrics_enabled && self.source.captured() > captured_before {
            let capture = self.source.last_capture_time();
            let send = elapsed.saturating_sub(capture);
            tracing::debug!(
                capture_ms = capture.as_millis() as u64,
                send_ms = send.as_millis() as u64,
                "frame timing"
            );
        }
    }

    fn run(mut self, running: Arc<AtomicBool>) {
        while running.load(Ordering::SeqCst) {
            self.run_once();
            self.pacer.wait_for_next_tick();
            thread::sleep(LOOP_YIELD);
        }
        tracing::debug!(
            frames = self.source.captured(),
            ticks = self.pacer.ticks(),
            "video context exited"
        );
    }
}

/// Everything the control thread owns.
pub struct ControlContext {
    control: ControlLoop,
    interval: Duration,
}

impl ControlContext {
    pub fn new(control: ControlLoop, interval: Duration) -> Self {
        Self { control, interval }
    }

    /// Bind the control transport selected in `config`.
    pub fn from_config(config: &StreamConfig, actuator: Box<dyn Actuator>) -> Result<Self> {
        let addr = config.bind_addr(config.control_port());
        let receiver: Box<dyn ControlTransport> = match config.control_protocol {
            ControlProtocol::Http => Box::new(HttpControlReceiver::bind(addr, config.stall_timeout())?),
            ControlProtocol::Udp => Box::new(UdpControlReceiver::bind(addr)?),
            ControlProtocol::WebSocket => {
                Box::new(WsControlReceiver::bind(addr, config.stall_timeout())?)
            }
        };
        Ok(Self::new(
            ControlLoop::new(Some(receiver), actuator),
            config.control_interval(),
        ))
    }

    pub fn run_once(&mut self) {
        if let Err(e) = self.control.step() {
            tracing::warn!(error = %e, "control step failed");
        }
    }

    fn run(mut self, running: Arc<AtomicBool>) {
        while running.load(Ordering::SeqCst) {
            self.run_once();
            thread::sleep(self.interval);
            thread::sleep(LOOP_YIELD);
        }
        tracing::debug!("control context exited");
    }
}

/// Runs the video and control contexts on two named threads, pinned to
/// cores [`VIDEO_CORE`] and [`CONTROL_CORE`] when the machine has at least
/// two.
///
/// Both contexts pump until [`stop`](Self::stop) clears the shared running
/// flag; neither ever exits on a pump error.
pub struct Scheduler {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        }
    }

    /// Initialize the adapter and spawn both contexts.
    ///
    /// Socket setup happens here, on the caller's thread, so bind failures
    /// are reported before anything runs.
    pub fn start<A: StreamAdapter + 'static>(
        &mut self,
        mut video: VideoContext<A>,
        control: ControlContext,
    ) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(StreamError::AlreadyRunning);
        }

        video.adapter.initialize()?;
        self.running.store(true, Ordering::SeqCst);

        let cores = core_affinity::get_core_ids().unwrap_or_default();
        let video_core = pick_core(&cores, VIDEO_CORE);
        let control_core = pick_core(&cores, CONTROL_CORE);
        if video_core.is_none() {
            tracing::info!(cores = cores.len(), "too few cores to pin contexts");
        }

        let protocol = video.adapter.name();
        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name("video".into())
            .spawn(move || {
                pin_current_thread(video_core);
                video.run(running)
            });
        match spawned {
            Ok(handle) => self.threads.push(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }

        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name("control".into())
            .spawn(move || {
                pin_current_thread(control_core);
                control.run(running)
            });
        match spawned {
            Ok(handle) => self.threads.push(handle),
            Err(e) => {
                self.stop();
                return Err(e.into());
            }
        }

        tracing::info!(protocol, "pipeline started");
        Ok(())
    }

    /// Clear the running flag and wait for both contexts to finish their
    /// current iteration.
    pub fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("pipeline stopping");
        }
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("?").to_string();
            if handle.join().is_err() {
                tracing::error!(thread = %name, "context panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
