use crate::error::{ParseErrorKind, StreamError};

/// A parsed HTTP/1.x-style request: request line plus headers.
///
/// ```text
/// Method SP Request-URI SP Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// Used for the HTTP surface. Header lookup is case-insensitive.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub version: String,
    /// Headers as ordered (name, value) pairs, names stored as received.
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Parse a complete request head (request line, headers, blank line).
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        let request_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(StreamError::Parse {
                kind: ParseErrorKind::EmptyRequest,
            })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon_pos = line.find(':').ok_or(StreamError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            headers.push((
                line[..colon_pos].trim().to_string(),
                line[colon_pos + 1..].trim().to_string(),
            ));
        }

        Ok(Request {
            method: parts[0].to_string(),
            uri: parts[1].to_string(),
            version: parts[2].to_string(),
            headers,
        })
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Declared body length; 0 when absent or not a number.
    pub fn content_length(&self) -> usize {
        self.get_header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Request path with any query string removed.
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or(&self.uri)
    }
}

/// The RTSP verbs the device answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspMethod {
    Options,
    Describe,
    Setup,
    Play,
    Teardown,
}

impl RtspMethod {
    pub const PUBLIC: &'static str = "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN";

    /// Find the verb anywhere in the request line.
    pub fn detect(request_line: &str) -> Option<Self> {
        [
            ("OPTIONS", Self::Options),
            ("DESCRIBE", Self::Describe),
            ("SETUP", Self::Setup),
            ("PLAY", Self::Play),
            ("TEARDOWN", Self::Teardown),
        ]
        .into_iter()
        .find(|(verb, _)| request_line.contains(verb))
        .map(|(_, method)| method)
    }
}

/// A leniently parsed RTSP request.
///
/// Unlike [`Request`], the request line is not required to have three
/// tokens: the verb is matched by substring and header lines without a
/// colon are skipped. An unknown verb is kept as `method: None` so the
/// caller can still answer with the request's CSeq.
#[derive(Debug)]
pub struct RtspCommand {
    pub method: Option<RtspMethod>,
    pub request_line: String,
    pub uri: Option<String>,
    /// Value of `CSeq`, or 0 when absent or not an integer.
    pub cseq: u32,
    pub headers: Vec<(String, String)>,
}

impl RtspCommand {
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines().skip_while(|l| l.trim().is_empty());

        let request_line = lines.next().ok_or(StreamError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let headers: Vec<(String, String)> = lines
            .take_while(|l| !l.is_empty())
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        let cseq = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("CSeq"))
            .map(|(_, value)| leading_integer(value))
            .unwrap_or(0);

        Ok(RtspCommand {
            method: RtspMethod::detect(request_line),
            request_line: request_line.trim().to_string(),
            uri: request_line.split_whitespace().nth(1).map(str::to_string),
            cseq,
            headers,
        })
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Digits at the start of `value`, saturating; 0 if there are none.
fn leading_integer(value: &str) -> u32 {
    value
        .chars()
        .map_while(|c| c.to_digit(10))
        .fold(0u32, |acc, d| acc.saturating_mul(10).saturating_add(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_http_get() {
        let raw = "GET /video?x=1 HTTP/1.1\r\nHost: cam\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path(), "/video");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.get_header("host"), Some("cam"));
    }

    #[test]
    fn content_length_defaults_to_zero() {
        let req = Request::parse("POST /control HTTP/1.1\r\ncontent-length: 12\r\n\r\n").unwrap();
        assert_eq!(req.content_length(), 12);
        let req = Request::parse("POST /control HTTP/1.1\r\nContent-Length: lots\r\n\r\n").unwrap();
        assert_eq!(req.content_length(), 0);
        let req = Request::parse("GET /status HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.content_length(), 0);
    }

    #[test]
    fn parse_empty_request() {
        assert!(Request::parse("").is_err());
        assert!(RtspCommand::parse("\r\n").is_err());
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(Request::parse("JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn rtsp_verb_by_substring() {
        assert_eq!(
            RtspMethod::detect("DESCRIBE rtsp://10.0.0.2:8554/ RTSP/1.0"),
            Some(RtspMethod::Describe)
        );
        assert_eq!(RtspMethod::detect("xxTEARDOWNxx"), Some(RtspMethod::Teardown));
        assert_eq!(RtspMethod::detect("PAUSE rtsp://x RTSP/1.0"), None);
    }

    #[test]
    fn rtsp_cseq_integer() {
        let raw = "SETUP rtsp://cam/trackID=0 RTSP/1.0\r\n\
                   cseq: 17 \r\n\
                   Transport: RTP/AVP;unicast;client_port=9000-9001\r\n\r\n";
        let cmd = RtspCommand::parse(raw).unwrap();
        assert_eq!(cmd.method, Some(RtspMethod::Setup));
        assert_eq!(cmd.cseq, 17);
        assert_eq!(cmd.uri.as_deref(), Some("rtsp://cam/trackID=0"));
        assert_eq!(
            cmd.get_header("transport"),
            Some("RTP/AVP;unicast;client_port=9000-9001")
        );
    }

    #[test]
    fn rtsp_missing_cseq_is_zero() {
        let cmd = RtspCommand::parse("OPTIONS * RTSP/1.0\r\nbroken line\r\n\r\n").unwrap();
        assert_eq!(cmd.cseq, 0);
        assert!(cmd.headers.is_empty());
    }
}
