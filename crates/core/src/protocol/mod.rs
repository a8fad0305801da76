//! Text signaling shared by the HTTP and RTSP surfaces.
//!
//! Both protocols use HTTP/1.1 message syntax: a request line, headers,
//! a blank line, and an optional body whose length is given by
//! `Content-Length`.
//!
//! ## RTSP subset
//!
//! | Method | Reply |
//! |--------|-------|
//! | OPTIONS | `Public` verb list |
//! | DESCRIBE | SDP body ([`sdp::describe_sdp`]) |
//! | SETUP | `Session` id and `Transport` |
//! | PLAY | `Session` id and `Range: npt=0.000-` |
//! | TEARDOWN | `Session` id, then the connection is closed |
//!
//! Anything else is answered with `501 Not Implemented`.

pub mod request;
pub mod response;
pub mod sdp;

pub use request::{Request, RtspCommand, RtspMethod};
pub use response::Response;
