//! Single-camera frame acquisition and multi-protocol video streaming.
//!
//! ```text
//!            ┌──────────── video thread ─────────────┐
//! Camera ──► FrameSource ──► VideoAdapter ──► network   (paced by FramePacer)
//!            └───────────────────────────────────────┘
//!            ┌─────────── control thread ────────────┐
//! network ──► ControlTransport ──► ControlState ──► Actuator
//!            └───────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod config;
pub mod control;
pub mod error;
pub mod media;
pub mod pacer;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod transport;

pub use adapter::{StreamAdapter, VideoAdapter};
pub use config::{ControlProtocol, StreamConfig, VideoProtocol};
pub use control::{ControlLoop, ControlState, ControlTransport, ControlUpdate};
pub use error::{CaptureFailure, Result, StreamError};
pub use pacer::FramePacer;
pub use scheduler::{ControlContext, Scheduler, VideoContext};
pub use source::{CameraDriver, Frame, FrameSource};
