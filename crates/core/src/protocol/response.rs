/// A text protocol response (RTSP/1.0 or HTTP/1.1).
///
/// Serializes to the standard format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Builder style: chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed from the body, so it always matches.
#[derive(Debug, Clone)]
#[must_use]
pub struct Response {
    pub version: &'static str,
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

pub const SERVER_AGENT: &str = "camstream/0.1";

pub const RTSP_VERSION: &str = "RTSP/1.0";
pub const HTTP_VERSION: &str = "HTTP/1.1";

impl Response {
    pub fn new(version: &'static str, status_code: u16, status_text: &str) -> Self {
        Response {
            version,
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    pub fn rtsp(status_code: u16, status_text: &str) -> Self {
        Self::new(RTSP_VERSION, status_code, status_text)
    }

    pub fn http(status_code: u16, status_text: &str) -> Self {
        Self::new(HTTP_VERSION, status_code, status_text)
    }

    /// RTSP 200 OK with the request's CSeq echoed.
    pub fn rtsp_ok(cseq: u32) -> Self {
        Self::rtsp(200, "OK").add_header("CSeq", &cseq.to_string())
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn serialize(&self) -> String {
        let mut response = format!("{} {} {}\r\n", self.version, self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }
}
