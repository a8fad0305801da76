//! Startup configuration.
//!
//! Everything here is read once before the scheduler starts. A TOML file
//! may override any subset of fields; missing fields keep their defaults:
//!
//! ```toml
//! video_protocol = "rtsp"
//! frame_interval_ms = 40
//!
//! [camera]
//! resolution = "svga"
//! quality = 12
//!
//! [ports]
//! rtsp = 8554
//! ```
//!
//! `control_protocol` (`http`, `udp` or `websocket`) picks the control
//! transport the same way `video_protocol` picks the video adapter.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, StreamError};

/// Multipart boundary token used by the MJPEG stream.
pub const MJPEG_BOUNDARY: &str = "123456789000000000000987654321";

/// Maximum payload bytes per RTP packet or UDP datagram (MTU-safe).
pub const MAX_FRAGMENT_SIZE: usize = 1400;

/// Sensor frame size presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Qqvga,
    Qvga,
    #[default]
    Vga,
    Svga,
    Xga,
    Sxga,
    Uxga,
}

impl Resolution {
    /// Width and height in pixels.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Qqvga => (160, 120),
            Self::Qvga => (320, 240),
            Self::Vga => (640, 480),
            Self::Svga => (800, 600),
            Self::Xga => (1024, 768),
            Self::Sxga => (1280, 1024),
            Self::Uxga => (1600, 1200),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "qqvga" => Some(Self::Qqvga),
            "qvga" => Some(Self::Qvga),
            "vga" => Some(Self::Vga),
            "svga" => Some(Self::Svga),
            "xga" => Some(Self::Xga),
            "sxga" => Some(Self::Sxga),
            "uxga" => Some(Self::Uxga),
            _ => None,
        }
    }
}

/// Which wire protocol the video context serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoProtocol {
    #[default]
    Http,
    Rtsp,
    Udp,
    #[serde(alias = "webrtc")]
    WebSocket,
}

impl VideoProtocol {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "rtsp" => Some(Self::Rtsp),
            "udp" => Some(Self::Udp),
            "websocket" | "ws" | "webrtc" => Some(Self::WebSocket),
            _ => None,
        }
    }
}

/// Which transport the control context listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ControlProtocol {
    #[default]
    Http,
    Udp,
    WebSocket,
}

impl ControlProtocol {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "udp" => Some(Self::Udp),
            "websocket" | "ws" => Some(Self::WebSocket),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub resolution: Resolution,
    /// JPEG quality, 0 (best) to 63 (worst).
    pub quality: u8,
    /// Emit uncompressed RGB565 instead of JPEG.
    pub raw_mode: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::Vga,
            quality: 10,
            raw_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Ports {
    pub http: u16,
    pub rtsp: u16,
    pub udp_video: u16,
    pub udp_control: u16,
    pub websocket: u16,
    /// `POST /control` and `GET /status`.
    pub control_http: u16,
    pub control_websocket: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            http: 80,
            rtsp: 8554,
            udp_video: 5000,
            udp_control: 5001,
            websocket: 81,
            control_http: 8080,
            control_websocket: 82,
        }
    }
}

/// Consecutive-failure backoff for the camera.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureBackoff {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for CaptureBackoff {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 100,
        }
    }
}

impl CaptureBackoff {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub camera: CameraSettings,
    pub video_protocol: VideoProtocol,
    pub control_protocol: ControlProtocol,
    pub bind_host: IpAddr,
    /// Destination for UDP video datagrams.
    pub broadcast_addr: Ipv4Addr,
    pub ports: Ports,
    pub frame_interval_ms: u64,
    pub control_interval_ms: u64,
    /// Per-frame capture/send timing logs.
    pub metrics_enabled: bool,
    pub capture: CaptureBackoff,
    /// How long a single client write may block before the frame is dropped.
    pub stall_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            camera: CameraSettings::default(),
            video_protocol: VideoProtocol::Http,
            control_protocol: ControlProtocol::Http,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_addr: Ipv4Addr::BROADCAST,
            ports: Ports::default(),
            frame_interval_ms: 33,
            control_interval_ms: 10,
            metrics_enabled: true,
            capture: CaptureBackoff::default(),
            stall_timeout_ms: 200,
        }
    }
}

impl StreamConfig {
    /// Read a TOML file. Fields absent from the file keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StreamError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| StreamError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_interval_ms == 0 {
            return Err(StreamError::Config("frame_interval_ms must be > 0".into()));
        }
        if self.control_interval_ms == 0 {
            return Err(StreamError::Config("control_interval_ms must be > 0".into()));
        }
        if self.camera.quality > 63 {
            return Err(StreamError::Config(format!(
                "quality {} out of range 0-63",
                self.camera.quality
            )));
        }
        if self.capture.failure_threshold == 0 {
            return Err(StreamError::Config("failure_threshold must be > 0".into()));
        }

        let p = &self.ports;
        let mut ports = [
            p.http,
            p.rtsp,
            p.udp_video,
            p.udp_control,
            p.websocket,
            p.control_http,
            p.control_websocket,
        ];
        ports.sort_unstable();
        if ports.windows(2).any(|w| w[0] == w[1]) {
            return Err(StreamError::Config("ports must be distinct".into()));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn control_interval(&self) -> Duration {
        Duration::from_millis(self.control_interval_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// Nominal frames per second implied by the frame interval (at least 1).
    pub fn frame_rate(&self) -> u32 {
        (1000 / self.frame_interval_ms.max(1)).max(1) as u32
    }

    /// Port of the selected control transport.
    pub fn control_port(&self) -> u16 {
        match self.control_protocol {
            ControlProtocol::Http => self.ports.control_http,
            ControlProtocol::Udp => self.ports.udp_control,
            ControlProtocol::WebSocket => self.ports.control_websocket,
        }
    }

    pub fn bind_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.bind_host, port)
    }

    /// MIME subtype for HTTP part headers.
    pub fn image_subtype(&self) -> &'static str {
        if self.camera.raw_mode { "raw" } else { "jpeg" }
    }
}
