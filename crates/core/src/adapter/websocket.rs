//! WebSocket push behind a WebRTC-shaped signaling stub.
//!
//! A client sends `{"type":"offer","sdp":...}` and receives a generated
//! `answer`; `{"type":"ice-candidate","candidate":...}` messages are
//! acknowledged with `{"type":"ice-ack"}`. Once an offer has been
//! answered, every captured frame is pushed to the client as one raw binary
//! message. There is no ICE, DTLS, SRTP or RTP framing.
//!
//! Socket I/O runs on a current-thread tokio runtime owned by the adapter.
//! The runtime only advances inside [`pump`](StreamAdapter::pump), so the
//! adapter lives entirely on the video context.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::SinkExt;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tokio_websockets::Message;

use super::StreamAdapter;
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::protocol::sdp::{StubCredentials, webrtc_answer_sdp};
use crate::session::StreamSession;
use crate::source::FrameSource;
use crate::transport::ws::{self, Incoming, WsListener, WsStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Disconnected,
    /// Offer answered.
    Signaling,
    /// At least one ICE candidate acknowledged.
    Connected,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum SignalMessage {
    Offer {
        #[serde(default)]
        sdp: Option<String>,
    },
    IceCandidate {
        #[serde(default)]
        candidate: Option<serde_json::Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum SignalReply {
    Answer { sdp: String },
    IceAck,
}

/// Signaling state for the current client.
#[derive(Debug)]
pub struct Signaling {
    state: SignalingState,
}

impl Signaling {
    pub fn new() -> Self {
        Self {
            state: SignalingState::Disconnected,
        }
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    /// Whether frames should be pushed.
    pub fn is_active(&self) -> bool {
        self.state != SignalingState::Disconnected
    }

    pub fn disconnect(&mut self) {
        if self.state != SignalingState::Disconnected {
            tracing::debug!(old_state = ?self.state, "signaling reset");
        }
        self.state = SignalingState::Disconnected;
    }

    /// Process one text message. Returns the JSON reply to send, if any.
    pub fn handle_text(&mut self, text: &str) -> Result<Option<String>> {
        let reply = match serde_json::from_str::<SignalMessage>(text)? {
            SignalMessage::Offer { sdp } => {
                tracing::debug!(offer_len = sdp.as_deref().map_or(0, str::len), "offer received");
                let creds = StubCredentials::random();
                self.state = SignalingState::Signaling;
                Some(SignalReply::Answer {
                    sdp: webrtc_answer_sdp(&creds),
                })
            }
            SignalMessage::IceCandidate { candidate: Some(_) } => {
                if self.state == SignalingState::Signaling {
                    self.state = SignalingState::Connected;
                }
                Some(SignalReply::IceAck)
            }
            SignalMessage::IceCandidate { candidate: None } | SignalMessage::Unknown => None,
        };
        reply.map(|r| serde_json::to_string(&r)).transpose().map_err(Into::into)
    }
}

impl Default for Signaling {
    fn default() -> Self {
        Self::new()
    }
}

struct WsClient {
    session: StreamSession,
    stream: WsStream,
}

pub struct WebSocketSignalingAdapter {
    addr: SocketAddr,
    listener: Option<WsListener>,
    client: Option<WsClient>,
    signaling: Signaling,
    stall_timeout: Duration,
}

impl WebSocketSignalingAdapter {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            addr: config.bind_addr(config.ports.websocket),
            listener: None,
            client: None,
            signaling: Signaling::new(),
            stall_timeout: config.stall_timeout(),
        }
    }

    pub fn state(&self) -> SignalingState {
        self.signaling.state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

impl StreamAdapter for WebSocketSignalingAdapter {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn initialize(&mut self) -> Result<()> {
        self.listener = Some(WsListener::bind(self.addr)?);
        tracing::info!(addr = %self.addr, "websocket signaling listening");
        Ok(())
    }

    fn pump(&mut self, source: &mut FrameSource) -> Result<()> {
        let WsListener { runtime, listener } =
            self.listener.as_ref().ok_or(StreamError::NotInitialized)?;
        let client = &mut self.client;
        let signaling = &mut self.signaling;
        let stall = self.stall_timeout;

        runtime.block_on(async {
            accept_client(listener, client, signaling).await;
            read_messages(client, signaling, stall).await;
        });

        if !signaling.is_active() {
            return Ok(());
        }
        let Some(ws) = client.as_mut() else {
            signaling.disconnect();
            return Ok(());
        };

        let frame = source.acquire()?;
        let sequence = frame.sequence();
        let message = Message::binary(frame.data().to_vec());
        source.release(frame);

        // The timer must be created inside the runtime.
        let sent = runtime.block_on(async { timeout(stall, ws.stream.send(message)).await });
        match sent {
            Ok(Ok(())) => {
                tracing::trace!(frame = sequence, "frame pushed");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::info!(peer = %ws.session.peer(), error = %e, "websocket client lost");
                *client = None;
                signaling.disconnect();
                Err(e.into())
            }
            Err(_) => Err(StreamError::TransportStall { frame: sequence }),
        }
    }
}

/// Take a pending connection, replacing any current client.
async fn accept_client(
    listener: &tokio::net::TcpListener,
    client: &mut Option<WsClient>,
    signaling: &mut Signaling,
) {
    let Some((stream, peer)) = ws::accept_pending(listener).await else {
        return;
    };

    if let Some(old) = client.take() {
        tracing::info!(old = %old.session.peer(), new = %peer, "replacing websocket client");
    } else {
        tracing::info!(%peer, "websocket client connected");
    }
    signaling.disconnect();
    *client = Some(WsClient {
        session: StreamSession::new(peer),
        stream,
    });
}

/// Handle every message already queued by the current client.
async fn read_messages(client: &mut Option<WsClient>, signaling: &mut Signaling, stall: Duration) {
    loop {
        let Some(ws) = client.as_mut() else {
            return;
        };
        let peer = ws.session.peer();
        let message = match ws::next_message(&mut ws.stream, peer).await {
            Incoming::Idle => return,
            Incoming::Message(message) => message,
            Incoming::Gone => {
                tracing::debug!(%peer, session_id = ws.session.id(), "signaling session ended");
                *client = None;
                signaling.disconnect();
                return;
            }
        };

        let Some(text) = message.as_text() else {
            continue;
        };

        match signaling.handle_text(text) {
            Ok(Some(reply)) => {
                if !matches!(timeout(stall, ws.stream.send(Message::text(reply))).await, Ok(Ok(()))) {
                    tracing::info!(%peer, "signaling reply failed");
                    *client = None;
                    signaling.disconnect();
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(%peer, error = %e, "bad signaling message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_produces_answer_and_enters_signaling() {
        let mut s = Signaling::new();
        let reply = s.handle_text(r#"{"type":"offer","sdp":"v=0\r\n"}"#).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(json["type"], "answer");
        assert!(json["sdp"].as_str().unwrap().contains("a=sendonly\r\n"));
        assert_eq!(s.state(), SignalingState::Signaling);
    }

    #[test]
    fn ice_candidate_acked_and_connects() {
        let mut s = Signaling::new();
        s.handle_text(r#"{"type":"offer"}"#).unwrap();
        let reply = s
            .handle_text(r#"{"type":"ice-candidate","candidate":"candidate:1 1 UDP 1 10.0.0.2 9 typ host"}"#)
            .unwrap();
        assert_eq!(reply.as_deref(), Some(r#"{"type":"ice-ack"}"#));
        assert_eq!(s.state(), SignalingState::Connected);
    }

    #[test]
    fn candidate_before_offer_stays_disconnected() {
        let mut s = Signaling::new();
        let reply = s.handle_text(r#"{"type":"ice-candidate","candidate":{}}"#).unwrap();
        assert!(reply.is_some());
        assert_eq!(s.state(), SignalingState::Disconnected);
        assert!(!s.is_active());
    }

    #[test]
    fn unknown_and_malformed_messages() {
        let mut s = Signaling::new();
        assert_eq!(s.handle_text(r#"{"type":"bye"}"#).unwrap(), None);
        assert_eq!(s.handle_text(r#"{"type":"ice-candidate"}"#).unwrap(), None);
        assert!(matches!(s.handle_text("not json"), Err(StreamError::Json(_))));
        assert_eq!(s.state(), SignalingState::Disconnected);
    }

    #[test]
    fn disconnect_resets() {
        let mut s = Signaling::new();
        s.handle_text(r#"{"type":"offer"}"#).unwrap();
        s.disconnect();
        assert_eq!(s.state(), SignalingState::Disconnected);
    }
}
