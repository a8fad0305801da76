use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use super::{ACK, CONTROL_BUFFER_SIZE, ControlState, ControlTransport, ControlUpdate};
use crate::error::Result;
use crate::protocol::{Request, Response};
use crate::transport::tcp::{self, HeadReader, ReadOutcome};

/// Requests that do not arrive in full within this are dropped.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

struct PendingRequest {
    stream: TcpStream,
    peer: SocketAddr,
    reader: HeadReader,
    since: Instant,
    request: Option<Request>,
}

enum Step {
    Waiting,
    /// Answered (or dropped); carries the command a `POST` delivered.
    Finished(Option<ControlUpdate>),
}

/// JSON control commands over HTTP.
///
/// - `POST /control` with a JSON body applies it: `200` with [`ACK`], or
///   `400 Invalid JSON`.
/// - `GET /status` returns the current [`ControlState`] as JSON.
///
/// Every response closes the connection.
pub struct HttpControlReceiver {
    listener: TcpListener,
    pending: Vec<PendingRequest>,
    write_timeout: Duration,
}

impl HttpControlReceiver {
    pub fn bind(addr: SocketAddr, write_timeout: Duration) -> Result<Self> {
        let listener = tcp::listen(addr)?;
        tracing::info!(%addr, "http control listening");
        Ok(Self {
            listener,
            pending: Vec::new(),
            write_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    fn serve(&self, client: &mut PendingRequest, state: &ControlState) -> Step {
        if client.since.elapsed() >= REQUEST_TIMEOUT {
            tracing::debug!(peer = %client.peer, "control request timed out");
            return Step::Finished(None);
        }

        if client.request.is_none() {
            let head = match client.reader.poll(&mut client.stream) {
                Ok(ReadOutcome::Head(head)) => head,
                Ok(ReadOutcome::Pending) => return Step::Waiting,
                Ok(ReadOutcome::Closed) => return Step::Finished(None),
                Err(e) => {
                    tracing::warn!(peer = %client.peer, error = %e, "bad control request");
                    self.reply(client, &Response::http(400, "Bad Request"));
                    return Step::Finished(None);
                }
            };
            match Request::parse(&head) {
                Ok(request) => client.request = Some(request),
                Err(e) => {
                    tracing::warn!(peer = %client.peer, error = %e, "unparseable control request");
                    self.reply(client, &Response::http(400, "Bad Request"));
                    return Step::Finished(None);
                }
            }
        }
        let Some(request) = client.request.as_ref() else {
            return Step::Finished(None);
        };

        let (response, update) = match (request.method.as_str(), request.path()) {
            ("GET", "/status") => (status(state), None),
            ("POST", "/control") => {
                let len = request.content_length();
                if len > CONTROL_BUFFER_SIZE {
                    (Response::http(413, "Payload Too Large"), None)
                } else {
                    match client.reader.poll_body(&mut client.stream, len) {
                        Ok(None) => return Step::Waiting,
                        Ok(Some(body)) => match ControlUpdate::from_json(&body) {
                            Ok(update) => (
                                Response::http(200, "OK")
                                    .add_header("Content-Type", "application/json")
                                    .with_body(ACK.to_string()),
                                Some(update),
                            ),
                            Err(e) => {
                                tracing::warn!(peer = %client.peer, error = %e, "malformed control body");
                                (
                                    Response::http(400, "Bad Request")
                                        .add_header("Content-Type", "text/plain")
                                        .with_body("Invalid JSON".to_string()),
                                    None,
                                )
                            }
                        },
                        Err(e) => {
                            tracing::debug!(peer = %client.peer, error = %e, "control body lost");
                            return Step::Finished(None);
                        }
                    }
                }
            }
            _ => (Response::http(404, "Not Found"), None),
        };

        self.reply(client, &response);
        Step::Finished(update)
    }

    fn reply(&self, client: &mut PendingRequest, response: &Response) {
        let response = response.clone().add_header("Connection", "close");
        tracing::debug!(peer = %client.peer, status = response.status_code, "control response");
        if let Err(e) = tcp::write_bounded(
            &mut client.stream,
            response.serialize().as_bytes(),
            self.write_timeout,
        ) {
            tracing::debug!(peer = %client.peer, error = %e, "control response write failed");
        }
    }
}

fn status(state: &ControlState) -> Response {
    match state.to_json() {
        Ok(json) => Response::http(200, "OK")
            .add_header("Content-Type", "application/json")
            .add_header("Access-Control-Allow-Origin", "*")
            .with_body(json),
        Err(e) => {
            tracing::error!(error = %e, "state encoding failed");
            Response::http(500, "Internal Server Error")
        }
    }
}

impl ControlTransport for HttpControlReceiver {
    fn name(&self) -> &'static str {
        "http"
    }

    fn poll(&mut self, state: &ControlState) -> Result<Option<ControlUpdate>> {
        while let Some((stream, peer)) = tcp::accept_pending(&self.listener)? {
            tracing::trace!(%peer, "control client connected");
            self.pending.push(PendingRequest {
                stream,
                peer,
                reader: HeadReader::new(),
                since: Instant::now(),
                request: None,
            });
        }

        let mut clients = std::mem::take(&mut self.pending);
        let mut found = None;
        let mut i = 0;
        while i < clients.len() {
            match self.serve(&mut clients[i], state) {
                Step::Waiting => i += 1,
                Step::Finished(update) => {
                    clients.swap_remove(i);
                    if update.is_some() {
                        found = update;
                        break;
                    }
                }
            }
        }
        self.pending = clients;
        Ok(found)
    }
}
