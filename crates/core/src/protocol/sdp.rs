//! SDP (Session Description Protocol) generation (RFC 8866).
//!
//! Two bodies are produced:
//!
//! - [`describe_sdp`]: the RTSP DESCRIBE answer, one video media line bound
//!   to the RTSP port.
//! - [`webrtc_answer_sdp`]: the stub answer returned to a WebSocket `offer`.
//!   It looks like a WebRTC answer but the credentials and fingerprint are
//!   random placeholders; no ICE or DTLS ever happens.

use base64::prelude::{BASE64_STANDARD_NO_PAD, Engine as _};
use rand::RngExt;

use crate::media::Packetizer;

pub const SESSION_NAME: &str = "camstream";

/// Generate the DESCRIBE body for the device stream.
pub fn describe_sdp(
    packetizer: &dyn Packetizer,
    session_id: u32,
    host: &str,
    rtsp_port: u16,
) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!("o=- {} 1 IN IP4 {}", session_id, host));
    sdp.push(format!("s={}", SESSION_NAME));
    sdp.push("c=IN IP4 0.0.0.0".to_string());
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:camstream".to_string());
    sdp.push("a=sendonly".to_string());
    sdp.push(format!(
        "m=video {} RTP/AVP {}",
        rtsp_port,
        packetizer.payload_type()
    ));
    sdp.extend(packetizer.sdp_attributes());

    tracing::trace!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

/// Placeholder ICE/DTLS parameters for the signaling stub.
#[derive(Debug, Clone)]
pub struct StubCredentials {
    pub session_version: u32,
    pub ice_ufrag: String,
    pub ice_pwd: String,
    pub fingerprint: String,
}

impl StubCredentials {
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let mut bytes = |n: usize| -> Vec<u8> { (0..n).map(|_| rng.random::<u8>()).collect() };
        let ufrag = bytes(6);
        let pwd = bytes(18);
        let digest = bytes(32);
        Self {
            session_version: rand::rng().random_range(0..1_000_000),
            ice_ufrag: BASE64_STANDARD_NO_PAD.encode(ufrag),
            ice_pwd: BASE64_STANDARD_NO_PAD.encode(pwd),
            fingerprint: digest
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(":"),
        }
    }
}

/// Build the stub SDP answer sent in reply to an `offer`.
pub fn webrtc_answer_sdp(creds: &StubCredentials) -> String {
    let sdp = [
        "v=0".to_string(),
        format!("o=- {} 2 IN IP4 127.0.0.1", creds.session_version),
        "s=-".to_string(),
        "t=0 0".to_string(),
        "a=group:BUNDLE video".to_string(),
        "m=video 9 UDP/TLS/RTP/SAVPF 96".to_string(),
        "c=IN IP4 0.0.0.0".to_string(),
        "a=rtcp:9 IN IP4 0.0.0.0".to_string(),
        format!("a=ice-ufrag:{}", creds.ice_ufrag),
        format!("a=ice-pwd:{}", creds.ice_pwd),
        format!("a=fingerprint:sha-256 {}", creds.fingerprint),
        "a=setup:active".to_string(),
        "a=mid:video".to_string(),
        "a=sendonly".to_string(),
        "a=rtcp-mux".to_string(),
        "a=rtcp-rsize".to_string(),
    ];
    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::mjpeg::JpegPacketizer;

    #[test]
    fn describe_has_single_video_line() {
        let p = JpegPacketizer::default();
        let sdp = describe_sdp(&p, 4242, "192.168.1.50", 8554);

        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("o=- 4242 1 IN IP4 192.168.1.50\r\n"));
        assert!(sdp.contains("s=camstream\r\n"));
        assert_eq!(sdp.matches("m=").count(), 1);
        assert!(sdp.contains("m=video 8554 RTP/AVP 26\r\n"));
        assert!(sdp.contains("a=rtpmap:26 JPEG/90000\r\n"));
        assert!(sdp.contains("a=control:trackID=0\r\n"));

        let m_idx = sdp.find("m=video").unwrap();
        let rtpmap_idx = sdp.find("a=rtpmap").unwrap();
        assert!(rtpmap_idx > m_idx, "media attributes must follow m=video");
        assert!(sdp.ends_with("\r\n"));
    }

    #[test]
    fn stub_answer_fields() {
        let creds = StubCredentials::random();
        assert!(creds.ice_ufrag.len() >= 4);
        assert!(creds.ice_pwd.len() >= 22);
        assert_eq!(creds.fingerprint.split(':').count(), 32);

        let sdp = webrtc_answer_sdp(&creds);
        assert!(sdp.contains("m=video 9 UDP/TLS/RTP/SAVPF 96\r\n"));
        assert!(sdp.contains(&format!("a=ice-ufrag:{}\r\n", creds.ice_ufrag)));
        assert!(sdp.contains("a=sendonly\r\n"));
    }
}
