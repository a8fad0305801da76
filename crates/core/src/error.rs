//! Error types for the streaming pipeline.

use std::fmt;

/// Errors that can occur in the streaming pipeline.
///
/// Variants map to the failure classes the pump loops distinguish:
///
/// - **Capture**: [`Capture`](Self::Capture): the camera could not produce a
///   frame. Transient; retried with backoff by [`FrameSource`](crate::source::FrameSource).
/// - **Protocol**: [`Parse`](Self::Parse), [`Json`](Self::Json): malformed
///   request or message. The adapter answers with a protocol error and keeps serving.
/// - **Transport**: [`TransportStall`](Self::TransportStall), [`Io`](Self::Io),
///   [`WebSocket`](Self::WebSocket): the client did not drain or the socket failed.
///   The current frame is abandoned.
/// - **Startup**: [`Config`](Self::Config), [`AlreadyRunning`](Self::AlreadyRunning),
///   [`NotInitialized`](Self::NotInitialized).
///
/// None of these is fatal to a running pump loop.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The camera did not deliver a frame.
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureFailure),

    /// Failed to parse an RTSP or HTTP request.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A client stopped draining data; the in-flight frame was dropped.
    #[error("client stalled, frame {frame} abandoned")]
    TransportStall { frame: u64 },

    /// A frame is too large to describe in the wire header.
    #[error("frame of {len} bytes exceeds the fragment header range")]
    FrameTooLarge { len: usize },

    /// Malformed JSON in a control or signaling message.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket handshake or framing error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_websockets::Error),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// [`Scheduler::start`](crate::Scheduler::start) was called twice.
    #[error("scheduler already running")]
    AlreadyRunning,

    /// `pump` was called before `initialize`.
    #[error("adapter not initialized")]
    NotInitialized,
}

/// Why the camera could not produce a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureFailure {
    /// The driver returned no buffer (sensor timeout, DMA overrun, ...).
    #[error("driver returned no frame")]
    NoFrame,
    /// A frame is still checked out; it must be released first.
    #[error("a frame is already checked out")]
    FrameOutstanding,
    /// The driver is gone (unplugged, shut down).
    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

/// Specific kind of request parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// The request line named a verb outside the supported subset.
    UnsupportedMethod(String),
    /// The request grew past the read buffer without a blank line.
    Oversized,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::UnsupportedMethod(method) => write!(f, "unsupported method {method}"),
            Self::Oversized => write!(f, "request too large"),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
