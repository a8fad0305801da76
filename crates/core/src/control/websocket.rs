use std::net::SocketAddr;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::time::timeout;
use tokio_websockets::Message;

use super::{ACK, CONTROL_BUFFER_SIZE, ControlState, ControlTransport, ControlUpdate};
use crate::error::Result;
use crate::transport::ws::{self, Incoming, WsListener, WsStream};

struct Client {
    stream: WsStream,
    peer: SocketAddr,
}

/// JSON control commands over a WebSocket.
///
/// One client at a time; a new connection replaces the current one. A
/// client receives the current [`ControlState`] as soon as it connects and
/// [`ACK`] for every text message that decodes. Anything else is logged and
/// ignored.
pub struct WsControlReceiver {
    listener: WsListener,
    client: Option<Client>,
    write_timeout: Duration,
}

impl WsControlReceiver {
    pub fn bind(addr: SocketAddr, write_timeout: Duration) -> Result<Self> {
        let listener = WsListener::bind(addr)?;
        tracing::info!(%addr, "websocket control listening");
        Ok(Self {
            listener,
            client: None,
            write_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }
}

impl ControlTransport for WsControlReceiver {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn poll(&mut self, state: &ControlState) -> Result<Option<ControlUpdate>> {
        let Self {
            listener: WsListener { runtime, listener },
            client,
            write_timeout,
        } = self;
        let write_timeout = *write_timeout;

        runtime.block_on(async {
            if let Some((stream, peer)) = ws::accept_pending(listener).await {
                match client.take() {
                    Some(old) => tracing::info!(old = %old.peer, new = %peer, "replacing control client"),
                    None => tracing::info!(%peer, "control client connected"),
                }
                let mut fresh = Client { stream, peer };
                match state.to_json() {
                    Ok(greeting) => {
                        if send(&mut fresh, greeting, write_timeout).await {
                            *client = Some(fresh);
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "state encoding failed"),
                }
            }

            loop {
                let Some(current) = client.as_mut() else {
                    return Ok(None);
                };
                let message = match ws::next_message(&mut current.stream, current.peer).await {
                    Incoming::Idle => return Ok(None),
                    Incoming::Gone => {
                        *client = None;
                        return Ok(None);
                    }
                    Incoming::Message(message) => message,
                };

                let Some(text) = message.as_text() else {
                    continue;
                };
                if text.len() > CONTROL_BUFFER_SIZE {
                    tracing::warn!(peer = %current.peer, len = text.len(), "control message too long");
                    continue;
                }
                match ControlUpdate::from_json(text.as_bytes()) {
                    Ok(update) => {
                        if !send(current, ACK.to_string(), write_timeout).await {
                            *client = None;
                        }
                        return Ok(Some(update));
                    }
                    Err(e) => {
                        tracing::warn!(peer = %current.peer, error = %e, "malformed control message");
                    }
                }
            }
        })
    }
}

/// Send one text message; `false` when the client should be dropped.
async fn send(client: &mut Client, text: String, limit: Duration) -> bool {
    match timeout(limit, client.stream.send(Message::text(text))).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::info!(peer = %client.peer, error = %e, "control client lost");
            false
        }
        Err(_) => {
            tracing::info!(peer = %client.peer, "control client stalled");
            false
        }
    }
}
