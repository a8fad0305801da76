use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::time::timeout;
use tokio_websockets::{Message, ServerBuilder, WebSocketStream};

use crate::error::Result;

/// How long one poll waits for a new connection or message.
pub const POLL_WINDOW: Duration = Duration::from_millis(1);

/// Upper bound on the HTTP upgrade exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

pub type WsStream = WebSocketStream<TcpStream>;

/// A current-thread runtime plus a bound listener.
///
/// The runtime is only driven by `block_on` from the owning context, so
/// no extra thread is ever spawned for socket I/O.
pub struct WsListener {
    pub runtime: Runtime,
    pub listener: TcpListener,
}

impl WsListener {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        let listener = runtime.block_on(TcpListener::bind(addr))?;
        Ok(Self { runtime, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Accept and upgrade one pending connection, waiting at most
/// [`POLL_WINDOW`] for it to show up.
pub async fn accept_pending(listener: &TcpListener) -> Option<(WsStream, SocketAddr)> {
    let (tcp, peer) = match timeout(POLL_WINDOW, listener.accept()).await {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "websocket accept failed");
            return None;
        }
        Err(_) => return None,
    };

    match timeout(HANDSHAKE_TIMEOUT, ServerBuilder::new().accept(tcp)).await {
        Ok(Ok((_request, stream))) => Some((stream, peer)),
        Ok(Err(e)) => {
            tracing::warn!(%peer, error = %e, "websocket handshake failed");
            None
        }
        Err(_) => {
            tracing::warn!(%peer, "websocket handshake timed out");
            None
        }
    }
}

/// Result of polling a client for one message.
pub enum Incoming {
    /// Nothing arrived within the poll window.
    Idle,
    Message(Message),
    /// Closed by the peer or failed; the client should be dropped.
    Gone,
}

pub async fn next_message(stream: &mut WsStream, peer: SocketAddr) -> Incoming {
    match timeout(POLL_WINDOW, stream.next()).await {
        Err(_) => Incoming::Idle,
        Ok(Some(Ok(message))) if message.is_close() => {
            tracing::info!(%peer, "websocket client closed");
            Incoming::Gone
        }
        Ok(Some(Ok(message))) => Incoming::Message(message),
        Ok(Some(Err(e))) => {
            tracing::info!(%peer, error = %e, "websocket client error");
            Incoming::Gone
        }
        Ok(None) => {
            tracing::info!(%peer, "websocket client disconnected");
            Incoming::Gone
        }
    }
}
