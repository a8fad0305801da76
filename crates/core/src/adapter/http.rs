//! Multipart MJPEG over HTTP.
//!
//! `GET /stream` serves a small HTML page embedding `/video`; `GET /video`
//! opens a `multipart/x-mixed-replace` response sent with chunked transfer
//! encoding, one part per frame. Only one `/video` viewer is served at a
//! time; a second one gets `503`.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use super::StreamAdapter;
use crate::config::{MJPEG_BOUNDARY, StreamConfig};
use crate::error::{Result, StreamError};
use crate::protocol::{Request, Response};
use crate::source::{Frame, FrameSource};
use crate::transport::tcp::{self, HeadReader, ReadOutcome};

/// Bytes requested from the chunker per HTTP chunk.
pub const CHUNK_SIZE: usize = 4096;

/// Connections that never finish their request head are dropped after this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const VIEWER_PAGE: &str = "<html><head>\
<meta name='viewport' content='width=device-width, initial-scale=1'>\
<style>img { width: 100%; height: auto; }</style>\
</head><body>\
<h1>camstream MJPEG</h1>\
<img src='/video' />\
</body></html>";

/// Part header preceding every frame in the multipart body.
pub fn part_header(subtype: &str, len: usize) -> String {
    format!(
        "\r\n--{MJPEG_BOUNDARY}\r\nContent-Type: image/{subtype}\r\nContent-Length: {len}\r\n\r\n"
    )
}

enum ChunkerState {
    AwaitingFrame,
    SendingHeader {
        frame: Frame,
        header: Vec<u8>,
        sent: usize,
    },
    SendingBody {
        frame: Frame,
        offset: usize,
    },
}

/// Resumable producer of the multipart body.
///
/// Each [`fill`](Self::fill) call writes as many bytes as fit in the
/// caller's buffer and remembers where it stopped, so the part header and
/// the frame body can be split across any number of calls:
///
/// ```text
/// AwaitingFrame ─acquire─► SendingHeader ─header done─► SendingBody ─body done─► AwaitingFrame
///                                                           (frame released)
/// ```
pub struct MultipartChunker {
    state: ChunkerState,
    subtype: &'static str,
}

impl MultipartChunker {
    pub fn new(subtype: &'static str) -> Self {
        Self {
            state: ChunkerState::AwaitingFrame,
            subtype,
        }
    }

    /// Fill `buf` with the next bytes of the stream. Returns the number of
    /// bytes written; 0 means no frame could be captured.
    pub fn fill(&mut self, source: &mut FrameSource, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let state = std::mem::replace(&mut self.state, ChunkerState::AwaitingFrame);
        let (written, next) = match state {
            ChunkerState::AwaitingFrame => match source.acquire() {
                Ok(frame) => {
                    tracing::trace!(sequence = frame.sequence(), len = frame.len(), "new part");
                    let header = part_header(self.subtype, frame.len()).into_bytes();
                    self.emit_header(source, frame, header, 0, buf)
                }
                Err(_) => (0, ChunkerState::AwaitingFrame),
            },
            ChunkerState::SendingHeader {
                frame,
                header,
                sent,
            } => self.emit_header(source, frame, header, sent, buf),
            ChunkerState::SendingBody { frame, offset } => Self::emit_body(source, frame, offset, buf),
        };
        self.state = next;
        written
    }

    fn emit_header(
        &self,
        source: &mut FrameSource,
        frame: Frame,
        header: Vec<u8>,
        sent: usize,
        buf: &mut [u8],
    ) -> (usize, ChunkerState) {
        let n = (header.len() - sent).min(buf.len());
        buf[..n].copy_from_slice(&header[sent..sent + n]);
        let sent = sent + n;

        if sent < header.len() {
            return (n, ChunkerState::SendingHeader { frame, header, sent });
        }
        if frame.is_empty() {
            source.release(frame);
            return (n, ChunkerState::AwaitingFrame);
        }
        (n, ChunkerState::SendingBody { frame, offset: 0 })
    }

    fn emit_body(
        source: &mut FrameSource,
        frame: Frame,
        offset: usize,
        buf: &mut [u8],
    ) -> (usize, ChunkerState) {
        let n = (frame.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&frame.data()[offset..offset + n]);
        let offset = offset + n;

        if offset >= frame.len() {
            source.release(frame);
            return (n, ChunkerState::AwaitingFrame);
        }
        (n, ChunkerState::SendingBody { frame, offset })
    }

    /// `true` when no frame is checked out.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ChunkerState::AwaitingFrame)
    }

    /// Sequence of the frame in flight, if any.
    pub fn frame_in_flight(&self) -> Option<u64> {
        match &self.state {
            ChunkerState::AwaitingFrame => None,
            ChunkerState::SendingHeader { frame, .. } | ChunkerState::SendingBody { frame, .. } => {
                Some(frame.sequence())
            }
        }
    }

    /// Drop the part in progress and hand its frame back.
    pub fn abandon(&mut self, source: &mut FrameSource) {
        match std::mem::replace(&mut self.state, ChunkerState::AwaitingFrame) {
            ChunkerState::AwaitingFrame => {}
            ChunkerState::SendingHeader { frame, .. } | ChunkerState::SendingBody { frame, .. } => {
                source.release(frame);
            }
        }
    }
}

struct PendingClient {
    stream: TcpStream,
    peer: SocketAddr,
    reader: HeadReader,
    since: Instant,
}

struct Viewer {
    stream: TcpStream,
    peer: SocketAddr,
}

/// What to do with a connection after its request was answered.
enum Route {
    Close(Response),
    Stream(Response),
}

pub struct HttpStreamAdapter {
    addr: SocketAddr,
    listener: Option<TcpListener>,
    pending: Vec<PendingClient>,
    viewer: Option<Viewer>,
    chunker: MultipartChunker,
    stall_timeout: Duration,
    scratch: Vec<u8>,
}

impl HttpStreamAdapter {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            addr: config.bind_addr(config.ports.http),
            listener: None,
            pending: Vec::new(),
            viewer: None,
            chunker: MultipartChunker::new(config.image_subtype()),
            stall_timeout: config.stall_timeout(),
            scratch: vec![0; CHUNK_SIZE],
        }
    }

    pub fn has_viewer(&self) -> bool {
        self.viewer.is_some()
    }

    fn accept_clients(&mut self) -> Result<()> {
        let Some(listener) = &self.listener else {
            return Err(StreamError::NotInitialized);
        };
        while let Some((stream, peer)) = tcp::accept_pending(listener)? {
            tracing::debug!(%peer, "http client connected");
            self.pending.push(PendingClient {
                stream,
                peer,
                reader: HeadReader::new(),
                since: Instant::now(),
            });
        }
        Ok(())
    }

    fn serve_requests(&mut self) {
        let mut still_pending = Vec::with_capacity(self.pending.len());
        for mut client in std::mem::take(&mut self.pending) {
            let head = match client.reader.poll(&mut client.stream) {
                Ok(ReadOutcome::Head(head)) => head,
                Ok(ReadOutcome::Pending) => {
                    if client.since.elapsed() < REQUEST_TIMEOUT {
                        still_pending.push(client);
                    } else {
                        tracing::debug!(peer = %client.peer, "request timed out");
                    }
                    continue;
                }
                Ok(ReadOutcome::Closed) => continue,
                Err(e) => {
                    tracing::warn!(peer = %client.peer, error = %e, "bad request");
                    let reply = Response::http(400, "Bad Request").add_header("Connection", "close");
                    let _ = tcp::write_bounded(
                        &mut client.stream,
                        reply.serialize().as_bytes(),
                        self.stall_timeout,
                    );
                    continue;
                }
            };

            let route = self.route(&head, client.peer);
            let (response, stream_video) = match route {
                Route::Close(r) => (r, false),
                Route::Stream(r) => (r, true),
            };
            tracing::debug!(peer = %client.peer, status = response.status_code, "response");

            if let Err(e) = tcp::write_bounded(
                &mut client.stream,
                response.serialize().as_bytes(),
                self.stall_timeout,
            ) {
                tracing::debug!(peer = %client.peer, error = %e, "response write failed");
                continue;
            }
            if stream_video {
                tracing::info!(peer = %client.peer, "mjpeg viewer attached");
                self.viewer = Some(Viewer {
                    stream: client.stream,
                    peer: client.peer,
                });
            }
        }
        self.pending = still_pending;
    }

    fn route(&self, head: &str, peer: SocketAddr) -> Route {
        let request = match Request::parse(head) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "unparseable request");
                return Route::Close(Response::http(400, "Bad Request").add_header("Connection", "close"));
            }
        };
        tracing::debug!(%peer, method = %request.method, uri = %request.uri, "request");

        match (request.method.as_str(), request.path()) {
            ("GET", "/stream") => Route::Close(
                Response::http(200, "OK")
                    .add_header("Content-Type", "text/html")
                    .add_header("Access-Control-Allow-Origin", "*")
                    .add_header("Connection", "close")
                    .with_body(VIEWER_PAGE.to_string()),
            ),
            ("GET", "/video") if self.viewer.is_some() => Route::Close(
                Response::http(503, "Service Unavailable")
                    .add_header("Connection", "close")
                    .add_header("Retry-After", "1"),
            ),
            ("GET", "/video") => Route::Stream(
                Response::http(200, "OK")
                    .add_header(
                        "Content-Type",
                        &format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"),
                    )
                    .add_header("Transfer-Encoding", "chunked")
                    .add_header("Access-Control-Allow-Origin", "*")
                    .add_header("Connection", "keep-alive")
                    .add_header("Cache-Control", "no-cache, no-store, must-revalidate")
                    .add_header("Pragma", "no-cache")
                    .add_header("Expires", "0"),
            ),
            _ => Route::Close(Response::http(404, "Not Found").add_header("Connection", "close")),
        }
    }

    /// Push one whole part to the viewer.
    fn stream_frame(&mut self, source: &mut FrameSource) -> Result<()> {
        let Some(viewer) = self.viewer.as_mut() else {
            return Ok(());
        };

        loop {
            let n = self.chunker.fill(source, &mut self.scratch);
            if n == 0 {
                return Ok(());
            }

            let mut chunk = Vec::with_capacity(n + 12);
            chunk.extend_from_slice(format!("{n:X}\r\n").as_bytes());
            chunk.extend_from_slice(&self.scratch[..n]);
            chunk.extend_from_slice(b"\r\n");

            if let Err(e) = tcp::write_bounded(&mut viewer.stream, &chunk, self.stall_timeout) {
                let frame = self.chunker.frame_in_flight().unwrap_or(0);
                self.chunker.abandon(source);
                let peer = viewer.peer;
                self.viewer = None;
                return if e.kind() == io::ErrorKind::TimedOut {
                    tracing::warn!(%peer, frame, "viewer stalled, dropping");
                    Err(StreamError::TransportStall { frame })
                } else {
                    tracing::info!(%peer, error = %e, "mjpeg viewer detached");
                    Ok(())
                };
            }

            if self.chunker.is_idle() {
                return Ok(());
            }
        }
    }
}

impl StreamAdapter for HttpStreamAdapter {
    fn name(&self) -> &'static str {
        "http"
    }

    fn initialize(&mut self) -> Result<()> {
        self.listener = Some(tcp::listen(self.addr)?);
        Ok(())
    }

    fn pump(&mut self, source: &mut FrameSource) -> Result<()> {
        self.accept_clients()?;
        self.serve_requests();
        self.stream_frame(source)
    }
}
