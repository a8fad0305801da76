use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{ParseErrorKind, Result, StreamError};

/// Largest request head accepted before the client is dropped.
pub const MAX_HEAD_LEN: usize = 8 * 1024;

/// Bind a listener in non-blocking mode so `accept` never parks the
/// calling pump.
pub fn listen(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    tracing::info!(%addr, "listening");
    Ok(listener)
}

/// Accept one pending connection, if any.
///
/// The returned stream is non-blocking; writes go through
/// [`write_bounded`].
pub fn accept_pending(listener: &TcpListener) -> Result<Option<(TcpStream, SocketAddr)>> {
    match listener.accept() {
        Ok((stream, peer)) => {
            stream.set_nonblocking(true)?;
            stream.set_nodelay(true)?;
            Ok(Some((stream, peer)))
        }
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Result of polling a [`HeadReader`].
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// No complete head buffered yet.
    Pending,
    /// One complete head, blank line included.
    Head(String),
    /// Peer closed the connection.
    Closed,
}

/// Accumulates bytes from a non-blocking stream and splits off complete
/// request heads (everything up to and including the first blank line).
///
/// Pipelined heads stay buffered and are returned by later polls.
#[derive(Debug, Default)]
pub struct HeadReader {
    buf: Vec<u8>,
}

impl HeadReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll<R: Read>(&mut self, stream: &mut R) -> Result<ReadOutcome> {
        if let Some(head) = self.take_head() {
            return Ok(ReadOutcome::Head(head));
        }

        let mut chunk = [0u8; 1024];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    if let Some(head) = self.take_head() {
                        return Ok(ReadOutcome::Head(head));
                    }
                    if self.buf.len() > MAX_HEAD_LEN {
                        self.buf.clear();
                        return Err(StreamError::Parse {
                            kind: ParseErrorKind::Oversized,
                        });
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::Pending);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// The `len` body bytes that follow a head, once they have all arrived.
    ///
    /// Call after [`poll`](Self::poll) returned the head; bytes already
    /// buffered behind the head count towards the body.
    pub fn poll_body<R: Read>(&mut self, stream: &mut R, len: usize) -> Result<Option<Vec<u8>>> {
        let mut chunk = [0u8; 1024];
        while self.buf.len() < len {
            match stream.read(&mut chunk) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let rest = self.buf.split_off(len);
        Ok(Some(std::mem::replace(&mut self.buf, rest)))
    }

    fn take_head(&mut self) -> Option<String> {
        let end = find_head_end(&self.buf)?;
        let rest = self.buf.split_off(end);
        let head = std::mem::replace(&mut self.buf, rest);
        Some(String::from_utf8_lossy(&head).into_owned())
    }
}

/// Index just past the first `\r\n\r\n` (or bare `\n\n`).
fn find_head_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Write all of `data` to a non-blocking stream, giving up once the peer
/// has not drained for `timeout`.
///
/// A stall is reported as [`io::ErrorKind::TimedOut`].
pub fn write_bounded<W: Write>(stream: &mut W, data: &[u8], timeout: Duration) -> io::Result<()> {
    let mut offset = 0;
    let mut last_progress = Instant::now();
    while offset < data.len() {
        match stream.write(&data[offset..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                offset += n;
                last_progress = Instant::now();
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                if last_progress.elapsed() >= timeout {
                    return Err(io::ErrorKind::TimedOut.into());
                }
                thread::sleep(Duration::from_millis(1));
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Hands out queued chunks, then `WouldBlock` (or EOF once closed).
    struct Trickle {
        chunks: VecDeque<Vec<u8>>,
        closed: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None if self.closed => Ok(0),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    fn trickle(chunks: &[&str]) -> Trickle {
        Trickle {
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            closed: false,
        }
    }

    #[test]
    fn head_split_across_reads() {
        let mut reader = HeadReader::new();
        let mut s = trickle(&["OPTIONS * RTSP/1.0\r\nCSe", "q: 3\r\n", "\r\n"]);
        assert_eq!(reader.poll(&mut s).unwrap(), ReadOutcome::Head(
            "OPTIONS * RTSP/1.0\r\nCSeq: 3\r\n\r\n".to_string()
        ));
        assert_eq!(reader.poll(&mut s).unwrap(), ReadOutcome::Pending);
    }

    #[test]
    fn pipelined_heads_come_out_in_order() {
        let mut reader = HeadReader::new();
        let mut s = trickle(&["A x R\r\n\r\nB y R\r\n\r\n"]);
        assert_eq!(reader.poll(&mut s).unwrap(), ReadOutcome::Head("A x R\r\n\r\n".into()));
        assert_eq!(reader.poll(&mut s).unwrap(), ReadOutcome::Head("B y R\r\n\r\n".into()));
    }

    #[test]
    fn eof_reports_closed() {
        let mut reader = HeadReader::new();
        let mut s = trickle(&[]);
        s.closed = true;
        assert_eq!(reader.poll(&mut s).unwrap(), ReadOutcome::Closed);
    }

    #[test]
    fn oversized_head_rejected() {
        let mut reader = HeadReader::new();
        let big = "x".repeat(1000);
        let chunks: Vec<&str> = std::iter::repeat_n(big.as_str(), 10).collect();
        let mut s = trickle(&chunks);
        assert!(matches!(
            reader.poll(&mut s),
            Err(StreamError::Parse { kind: ParseErrorKind::Oversized })
        ));
    }

    #[test]
    fn body_follows_head() {
        let mut reader = HeadReader::new();
        let mut s = trickle(&["POST /control HTTP/1.1\r\nContent-Length: 9\r\n\r\n{\"pa", "n\":5}"]);
        assert!(matches!(reader.poll(&mut s).unwrap(), ReadOutcome::Head(_)));
        assert_eq!(reader.poll_body(&mut s, 9).unwrap(), Some(br#"{"pan":5}"#.to_vec()));
    }

    #[test]
    fn partial_body_is_pending() {
        let mut reader = HeadReader::new();
        let mut s = trickle(&["POST / HTTP/1.1\r\n\r\nabc"]);
        assert!(matches!(reader.poll(&mut s).unwrap(), ReadOutcome::Head(_)));
        assert_eq!(reader.poll_body(&mut s, 5).unwrap(), None);
        s.chunks.push_back(b"de".to_vec());
        assert_eq!(reader.poll_body(&mut s, 5).unwrap(), Some(b"abcde".to_vec()));
    }

    #[test]
    fn body_cut_short_is_an_error() {
        let mut reader = HeadReader::new();
        let mut s = trickle(&["POST / HTTP/1.1\r\n\r\nab"]);
        s.closed = true;
        assert!(matches!(reader.poll(&mut s).unwrap(), ReadOutcome::Head(_)));
        assert!(matches!(reader.poll_body(&mut s, 5), Err(StreamError::Io(_))));
    }

    struct Blocked;

    impl Write for Blocked {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stalled_writer_times_out() {
        let err = write_bounded(&mut Blocked, b"frame", Duration::from_millis(5)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn write_bounded_writes_everything() {
        let mut out = Vec::new();
        write_bounded(&mut out, b"hello", Duration::from_millis(5)).unwrap();
        assert_eq!(out, b"hello");
    }
}
