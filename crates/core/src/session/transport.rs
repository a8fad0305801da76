use std::net::{IpAddr, SocketAddr};

/// Client ports used when SETUP carries no usable `client_port`.
pub const DEFAULT_CLIENT_PORTS: (u16, u16) = (8000, 8001);

/// Where RTP for a session is delivered (RFC 2326 §12.39).
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
/// ```
///
/// RTP goes to `client_addr` (`peer_ip:client_rtp_port`). No RTCP is sent
/// or read; the RTCP port is only echoed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub client_rtp_port: u16,
    pub client_rtcp_port: u16,
    pub client_addr: SocketAddr,
}

impl Transport {
    pub fn for_peer(peer_ip: IpAddr, header: &TransportHeader) -> Self {
        Self {
            client_rtp_port: header.client_rtp_port,
            client_rtcp_port: header.client_rtcp_port,
            client_addr: SocketAddr::new(peer_ip, header.client_rtp_port),
        }
    }

    /// Value for the `Transport` response header.
    pub fn header_value(&self) -> String {
        format!(
            "RTP/AVP;unicast;client_port={}-{}",
            self.client_rtp_port, self.client_rtcp_port
        )
    }
}

/// Client-side ports parsed from the RTSP `Transport` header.
///
/// Only `RTP/AVP;unicast` with a `client_port=RTP-RTCP` pair is
/// understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub client_rtp_port: u16,
    pub client_rtcp_port: u16,
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// ```
    /// use camstream::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.client_rtp_port, 8000);
    /// assert_eq!(th.client_rtcp_port, 8001);
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("client_port=") {
                let port_parts: Vec<&str> = ports.split('-').collect();

                let rtp_port: u16 = port_parts.first()?.trim().parse().ok()?;
                let rtcp_port: u16 = match port_parts.get(1) {
                    Some(p) => p.trim().parse().ok()?,
                    None => rtp_port.checked_add(1)?,
                };

                return Some(TransportHeader {
                    client_rtp_port: rtp_port,
                    client_rtcp_port: rtcp_port,
                });
            }
        }
        None
    }

    /// Parse `header`, falling back to [`DEFAULT_CLIENT_PORTS`].
    pub fn parse_or_default(header: Option<&str>) -> Self {
        header.and_then(Self::parse).unwrap_or(TransportHeader {
            client_rtp_port: DEFAULT_CLIENT_PORTS.0,
            client_rtcp_port: DEFAULT_CLIENT_PORTS.1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_transport() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(th.client_rtp_port, 5000);
        assert_eq!(th.client_rtcp_port, 5001);
    }

    #[test]
    fn parse_single_port() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=6970").unwrap();
        assert_eq!(th.client_rtcp_port, 6971);
    }

    #[test]
    fn parse_no_client_port() {
        assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    }

    #[test]
    fn missing_header_uses_default_ports() {
        let th = TransportHeader::parse_or_default(None);
        assert_eq!((th.client_rtp_port, th.client_rtcp_port), DEFAULT_CLIENT_PORTS);

        let t = Transport::for_peer("127.0.0.1".parse().unwrap(), &th);
        assert_eq!(t.header_value(), "RTP/AVP;unicast;client_port=8000-8001");
    }
}
