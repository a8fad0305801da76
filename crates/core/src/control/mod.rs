//! Pan/tilt/zoom/LED/brightness control.
//!
//! The control context owns a [`ControlLoop`], which owns the
//! [`ControlState`]. Each step drains pending commands from one
//! [`ControlTransport`], folds them into the state (clamping every field)
//! and then drives the [`Actuator`] once with the result.
//!
//! | Transport | Receiver | Reply |
//! |-----------|----------|-------|
//! | UDP datagrams | [`UdpControlReceiver`] | [`ACK`] to the sender |
//! | `POST /control`, `GET /status` | [`HttpControlReceiver`] | `200`/`400`, state JSON |
//! | WebSocket text | [`WsControlReceiver`] | state on connect, [`ACK`] per command |

pub mod http;
pub mod udp;
pub mod websocket;

use serde::{Deserialize, Serialize};

use crate::error::Result;
pub use http::HttpControlReceiver;
pub use udp::UdpControlReceiver;
pub use websocket::WsControlReceiver;

/// Largest control message accepted by any transport.
pub const CONTROL_BUFFER_SIZE: usize = 512;

/// Reply sent for every decoded command.
pub const ACK: &str = r#"{"status":"ok","received":true}"#;

pub const AXIS_MIN: i32 = -100;
pub const AXIS_MAX: i32 = 100;
pub const BRIGHTNESS_MAX: i32 = 100;

/// Last applied control command. Always within range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    pub pan: i32,
    pub tilt: i32,
    pub zoom: i32,
    pub led: bool,
    pub brightness: i32,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            pan: 0,
            tilt: 0,
            zoom: 0,
            led: false,
            brightness: 50,
        }
    }
}

impl ControlState {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Fold `update` into the state. Absent fields keep their value; out of
    /// range values are clamped.
    pub fn apply(&mut self, update: &ControlUpdate) {
        if let Some(pan) = update.pan {
            self.pan = clamp(pan, AXIS_MIN, AXIS_MAX);
        }
        if let Some(tilt) = update.tilt {
            self.tilt = clamp(tilt, AXIS_MIN, AXIS_MAX);
        }
        if let Some(zoom) = update.zoom {
            self.zoom = clamp(zoom, AXIS_MIN, AXIS_MAX);
        }
        if let Some(led) = update.led {
            self.led = led.is_on();
        }
        if let Some(brightness) = update.brightness {
            self.brightness = clamp(brightness, 0, BRIGHTNESS_MAX);
        }
    }
}

fn clamp(value: f64, min: i32, max: i32) -> i32 {
    value.clamp(f64::from(min), f64::from(max)) as i32
}

/// LED field as sent by clients: a JSON bool or a number.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LedValue {
    Flag(bool),
    Level(f64),
}

impl LedValue {
    pub fn is_on(self) -> bool {
        match self {
            LedValue::Flag(on) => on,
            LedValue::Level(level) => level != 0.0,
        }
    }
}

/// A decoded control message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ControlUpdate {
    pub pan: Option<f64>,
    pub tilt: Option<f64>,
    pub zoom: Option<f64>,
    pub led: Option<LedValue>,
    pub brightness: Option<f64>,
}

impl ControlUpdate {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A source of control commands.
///
/// `poll` never blocks: it returns the next decoded command, or `None` once
/// nothing more is pending. `state` is the current control state, for
/// transports that report it back to clients.
pub trait ControlTransport: Send {
    fn name(&self) -> &'static str;

    fn poll(&mut self, state: &ControlState) -> Result<Option<ControlUpdate>>;
}

/// Hardware side effect of the control state.
pub trait Actuator: Send {
    fn actuate(&mut self, state: &ControlState);
}

/// Drives the status LED. Without real GPIO it logs LED edges and keeps
/// the last brightness.
#[derive(Debug, Default)]
pub struct LedActuator {
    lit: bool,
    brightness: i32,
    toggles: u64,
}

impl LedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    pub fn brightness(&self) -> i32 {
        self.brightness
    }

    pub fn toggles(&self) -> u64 {
        self.toggles
    }
}

impl Actuator for LedActuator {
    fn actuate(&mut self, state: &ControlState) {
        if state.led != self.lit {
            self.lit = state.led;
            self.toggles += 1;
            tracing::info!(led = state.led, "led switched");
        }
        if state.brightness != self.brightness {
            tracing::debug!(brightness = state.brightness, "brightness changed");
            self.brightness = state.brightness;
        }
    }
}

/// The control context's pump.
pub struct ControlLoop {
    state: ControlState,
    receiver: Option<Box<dyn ControlTransport>>,
    actuator: Box<dyn Actuator>,
}

impl ControlLoop {
    pub fn new(receiver: Option<Box<dyn ControlTransport>>, actuator: Box<dyn Actuator>) -> Self {
        Self {
            state: ControlState::default(),
            receiver,
            actuator,
        }
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn apply(&mut self, update: &ControlUpdate) {
        self.state.apply(update);
        log_state(&self.state);
    }

    /// Drain pending commands, applying each as it arrives, then actuate
    /// once.
    ///
    /// A receive error stops the drain. Commands taken before it stay
    /// applied and the actuator still runs before the error is returned.
    pub fn step(&mut self) -> Result<()> {
        let mut failure = None;
        if let Some(receiver) = self.receiver.as_mut() {
            loop {
                match receiver.poll(&self.state) {
                    Ok(Some(update)) => {
                        tracing::trace!(transport = receiver.name(), "control command");
                        self.state.apply(&update);
                        log_state(&self.state);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
        self.actuator.actuate(&self.state);
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn log_state(state: &ControlState) {
    tracing::debug!(
        pan = state.pan,
        tilt = state.tilt,
        zoom = state.zoom,
        led = state.led,
        brightness = state.brightness,
        "control update"
    );
}
