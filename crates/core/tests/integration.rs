//! End-to-end tests: run the pipeline on loopback with a scripted camera
//! and talk to it with plain socket clients.
//!
//! Every test uses its own fixed port block so the tests can run in
//! parallel.

use std::cell::Cell;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use camstream::adapter::http::part_header;
use camstream::adapter::{SignalingState, StreamAdapter, WebSocketSignalingAdapter, rtsp, udp};
use camstream::config::Ports;
use camstream::control::{ACK, Actuator, ControlLoop, LedActuator, UdpControlReceiver};
use camstream::media::fragment::{FRAGMENT_HEADER_LEN, FragmentHeader};
use camstream::source::ScriptedCamera;
use camstream::transport::DatagramSink;
use camstream::{
    ControlContext, ControlProtocol, ControlState, FrameSource, Scheduler, StreamConfig, StreamError,
    VideoContext, VideoProtocol,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio_websockets::{ClientBuilder, Message};

fn test_config(protocol: VideoProtocol, base_port: u16) -> StreamConfig {
    let mut config = StreamConfig::default();
    config.video_protocol = protocol;
    config.bind_host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.broadcast_addr = Ipv4Addr::LOCALHOST;
    config.ports = Ports {
        http: base_port,
        rtsp: base_port + 1,
        udp_video: base_port + 2,
        udp_control: base_port + 3,
        websocket: base_port + 4,
        control_http: base_port + 5,
        control_websocket: base_port + 6,
    };
    config.metrics_enabled = false;
    config.stall_timeout_ms = 500;
    config
}

fn start_pipeline(config: &StreamConfig, frame: Vec<u8>) -> Scheduler {
    start_with_camera(config, &ScriptedCamera::repeating(frame))
}

fn start_with_camera(config: &StreamConfig, camera: &ScriptedCamera) -> Scheduler {
    let video = VideoContext::from_config(config, Box::new(camera.clone()));
    let control =
        ControlContext::from_config(config, Box::new(LedActuator::new())).expect("control port");
    let mut scheduler = Scheduler::new();
    scheduler.start(video, control).expect("scheduler start");
    scheduler
}

fn connect(port: u16) -> TcpStream {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.set_write_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
}

/// Read a response head, plus the body when `Content-Length` is present.
fn read_response(reader: &mut BufReader<TcpStream>) -> std::io::Result<String> {
    let mut response = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        response.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    if let Some(len) = response
        .lines()
        .find(|l| l.to_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        if len > 0 {
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body)?;
            response.push_str(&String::from_utf8_lossy(&body));
        }
    }

    Ok(response)
}

fn rtsp_request(reader: &mut BufReader<TcpStream>, request: &str) -> std::io::Result<String> {
    reader.get_mut().write_all(request.as_bytes())?;
    reader.get_mut().flush()?;
    read_response(reader)
}

fn test_frame(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn rtsp_handshake_and_rtp_delivery() {
    let config = test_config(VideoProtocol::Rtsp, 18_550);
    let mut scheduler = start_pipeline(&config, test_frame(3000));

    let rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    rtp.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let rtp_port = rtp.local_addr().unwrap().port();

    let mut reader = BufReader::new(connect(config.ports.rtsp));
    let base_uri = format!("rtsp://127.0.0.1:{}/", config.ports.rtsp);

    let options = rtsp_request(&mut reader, &format!("OPTIONS {base_uri} RTSP/1.0\r\nCSeq: 1\r\n\r\n")).unwrap();
    assert!(options.starts_with("RTSP/1.0 200 OK\r\n"), "{options}");
    assert!(options.contains("CSeq: 1\r\n"));
    assert!(options.contains("Public: OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN\r\n"));

    let describe = rtsp_request(
        &mut reader,
        &format!("DESCRIBE {base_uri} RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n"),
    )
    .unwrap();
    assert!(describe.contains("CSeq: 2\r\n"));
    let (head, body) = describe.split_once("\r\n\r\n").unwrap();
    let content_length: usize = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(content_length, body.len());
    assert!(body.contains(&format!("m=video {} RTP/AVP 26\r\n", config.ports.rtsp)));
    assert!(body.contains("o=- "));

    let setup = rtsp_request(
        &mut reader,
        &format!(
            "SETUP {base_uri}trackID=0 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
            rtp_port,
            rtp_port + 1
        ),
    )
    .unwrap();
    assert!(setup.contains("CSeq: 3\r\n"));
    let session = setup
        .lines()
        .find_map(|l| l.strip_prefix("Session: "))
        .expect("Session header")
        .to_string();
    assert!(session.parse::<u32>().is_ok(), "session id {session}");

    // Set up but not playing: nothing may arrive yet.
    let mut buf = [0u8; 2048];
    rtp.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    assert!(rtp.recv(&mut buf).is_err(), "rtp before PLAY");
    rtp.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let play = rtsp_request(
        &mut reader,
        &format!("PLAY {base_uri} RTSP/1.0\r\nCSeq: 4\r\nSession: {session}\r\n\r\n"),
    )
    .unwrap();
    assert!(play.contains("CSeq: 4\r\n"));
    assert!(play.contains("Range: npt=0.000-\r\n"));

    // Two frames of 3000 bytes: 3 packets each.
    let mut packets = Vec::new();
    while packets.len() < 6 {
        let n = rtp.recv(&mut buf).expect("rtp packet");
        packets.push(buf[..n].to_vec());
    }

    for p in &packets {
        assert_eq!(p[0], 0x80);
        assert_eq!(p[1], 0x1A);
        assert_eq!(&p[8..12], &0x1234_5678u32.to_be_bytes());
    }
    let seq = |p: &Vec<u8>| u16::from_be_bytes([p[2], p[3]]);
    let ts = |p: &Vec<u8>| u32::from_be_bytes([p[4], p[5], p[6], p[7]]);
    for pair in packets.windows(2) {
        assert_eq!(seq(&pair[1]), seq(&pair[0]).wrapping_add(1));
    }
    let payloads: Vec<usize> = packets[..3].iter().map(|p| p.len() - 12).collect();
    assert_eq!(payloads, vec![1400, 1400, 200]);
    assert_eq!(ts(&packets[0]), ts(&packets[2]));
    assert_eq!(ts(&packets[3]), ts(&packets[0]).wrapping_add(3000));

    let teardown = rtsp_request(
        &mut reader,
        &format!("TEARDOWN {base_uri} RTSP/1.0\r\nCSeq: 5\r\nSession: {session}\r\n\r\n"),
    )
    .unwrap();
    assert!(teardown.starts_with("RTSP/1.0 200 OK\r\n"));
    assert!(teardown.contains("CSeq: 5\r\n"));

    let mut rest = Vec::new();
    let closed = reader.read_to_end(&mut rest).map(|n| n == 0).unwrap_or(true);
    assert!(closed, "connection should close after TEARDOWN");

    scheduler.stop();
}

#[test]
fn rtsp_unknown_verb_gets_501() {
    let config = test_config(VideoProtocol::Rtsp, 18_560);
    let mut scheduler = start_pipeline(&config, test_frame(10));

    let mut reader = BufReader::new(connect(config.ports.rtsp));
    let reply = rtsp_request(&mut reader, "GET_PARAMETER rtsp://127.0.0.1/ RTSP/1.0\r\nCSeq: 7\r\n\r\n").unwrap();
    assert!(reply.starts_with("RTSP/1.0 501 Not Implemented\r\n"), "{reply}");
    assert!(reply.contains("CSeq: 7\r\n"));

    let options = rtsp_request(&mut reader, "OPTIONS * RTSP/1.0\r\nCSeq: 8\r\n\r\n").unwrap();
    assert!(options.contains("CSeq: 8\r\n"));

    scheduler.stop();
}

/// Read one HTTP chunk body; `None` on the terminating chunk.
fn read_chunk(reader: &mut BufReader<TcpStream>) -> Option<Vec<u8>> {
    let mut size_line = String::new();
    reader.read_line(&mut size_line).ok()?;
    let size = usize::from_str_radix(size_line.trim(), 16).ok()?;
    if size == 0 {
        return None;
    }
    let mut data = vec![0u8; size + 2];
    reader.read_exact(&mut data).ok()?;
    assert_eq!(&data[size..], b"\r\n");
    data.truncate(size);
    Some(data)
}

#[test]
fn http_mjpeg_stream() {
    let config = test_config(VideoProtocol::Http, 18_570);
    let frame = test_frame(5000);
    let mut scheduler = start_pipeline(&config, frame.clone());

    let mut page = BufReader::new(connect(config.ports.http));
    page.get_mut().write_all(b"GET /stream HTTP/1.1\r\nHost: cam\r\n\r\n").unwrap();
    let html = read_response(&mut page).unwrap();
    assert!(html.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(html.contains("Content-Type: text/html\r\n"));
    assert!(html.contains("<img src='/video' />"));

    let mut missing = BufReader::new(connect(config.ports.http));
    missing.get_mut().write_all(b"GET /nothing HTTP/1.1\r\n\r\n").unwrap();
    assert!(read_response(&mut missing).unwrap().starts_with("HTTP/1.1 404 Not Found\r\n"));

    let mut video = BufReader::new(connect(config.ports.http));
    video.get_mut().write_all(b"GET /video HTTP/1.1\r\nHost: cam\r\n\r\n").unwrap();
    let head = read_response(&mut video).unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
    assert!(head.contains(
        "Content-Type: multipart/x-mixed-replace; boundary=123456789000000000000987654321\r\n"
    ));
    assert!(head.contains("Transfer-Encoding: chunked\r\n"));

    let mut expected = part_header("jpeg", frame.len()).into_bytes();
    expected.extend_from_slice(&frame);
    let mut body = Vec::new();
    while body.len() < expected.len() * 2 {
        body.extend(read_chunk(&mut video).expect("chunk"));
    }
    assert_eq!(&body[..expected.len()], &expected[..]);
    assert_eq!(&body[expected.len()..expected.len() * 2], &expected[..]);

    let mut second = BufReader::new(connect(config.ports.http));
    second.get_mut().write_all(b"GET /video HTTP/1.1\r\n\r\n").unwrap();
    let busy = read_response(&mut second).unwrap();
    assert!(busy.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "{busy}");

    drop(video);
    scheduler.stop();
}

#[test]
fn udp_broadcast_fragments() {
    let config = test_config(VideoProtocol::Udp, 18_580);
    let receiver = UdpSocket::bind(("127.0.0.1", config.ports.udp_video)).unwrap();
    receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let frame = test_frame(3000);
    let mut scheduler = start_pipeline(&config, frame.clone());

    let mut buf = [0u8; 2048];
    let mut datagrams = Vec::new();
    while datagrams.len() < 6 {
        let n = receiver.recv(&mut buf).expect("datagram");
        let header = FragmentHeader::parse(&buf[..n]).expect("header");
        assert_eq!(usize::from(header.payload_size), n - FRAGMENT_HEADER_LEN);
        datagrams.push((header, buf[FRAGMENT_HEADER_LEN..n].to_vec()));
    }
    scheduler.stop();

    let first = &datagrams[..3];
    assert_eq!(first[0].0.frame_number, 1);
    let sizes: Vec<u16> = first.iter().map(|(h, _)| h.payload_size).collect();
    assert_eq!(sizes, vec![1400, 1400, 200]);
    for (i, (h, _)) in first.iter().enumerate() {
        assert_eq!(h.packet_number as usize, i);
        assert_eq!(h.total_packets, 3);
        assert_eq!(h.frame_size, 3000);
    }
    let reassembled: Vec<u8> = first.iter().flat_map(|(_, p)| p.iter().copied()).collect();
    assert_eq!(reassembled, frame);

    assert_eq!(datagrams[3].0.frame_number, 2);
    assert_eq!(datagrams[3].0.packet_number, 0);
}

/// Records every state the control loop actuates.
#[derive(Clone, Default)]
struct RecordingActuator {
    seen: Arc<Mutex<Vec<ControlState>>>,
}

impl Actuator for RecordingActuator {
    fn actuate(&mut self, state: &ControlState) {
        self.seen.lock().push(*state);
    }
}

#[test]
fn udp_control_is_clamped_and_acknowledged() {
    let receiver = UdpControlReceiver::bind("127.0.0.1:18593".parse().unwrap()).unwrap();
    let target = receiver.local_addr().unwrap();
    let recorder = RecordingActuator::default();
    let mut control = ControlLoop::new(Some(Box::new(receiver)), Box::new(recorder.clone()));

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client
        .send_to(br#"{"pan":150,"tilt":-150,"zoom":20,"led":1,"brightness":300}"#, target)
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while control.state().pan == 0 && Instant::now() < deadline {
        control.step().unwrap();
        thread::sleep(Duration::from_millis(5));
    }

    let state = *control.state();
    assert_eq!(
        state,
        ControlState {
            pan: 100,
            tilt: -100,
            zoom: 20,
            led: true,
            brightness: 100
        }
    );
    assert_eq!(recorder.seen.lock().last(), Some(&state));

    let mut buf = [0u8; 128];
    let (n, _) = client.recv_from(&mut buf).expect("ack");
    assert_eq!(&buf[..n], ACK.as_bytes());
}

#[tokio::test]
async fn websocket_signaling_then_binary_frames() {
    let config = test_config(VideoProtocol::WebSocket, 18_600);
    let frame = test_frame(2048);

    // The adapter owns its own runtime; start it off the test runtime.
    let start_config = config.clone();
    let start_frame = frame.clone();
    let mut scheduler = thread::spawn(move || start_pipeline(&start_config, start_frame))
        .join()
        .expect("start thread");

    let uri = format!("ws://127.0.0.1:{}", config.ports.websocket);
    let (mut client, _response) = ClientBuilder::from_uri(uri.parse().unwrap())
        .connect()
        .await
        .expect("websocket connect");

    client
        .send(Message::text(r#"{"type":"offer","sdp":"v=0\r\n"}"#.to_string()))
        .await
        .unwrap();

    let wait = Duration::from_secs(3);
    let answer = loop {
        let message = tokio::time::timeout(wait, client.next())
            .await
            .expect("answer in time")
            .expect("stream open")
            .expect("valid message");
        if let Some(text) = message.as_text() {
            break serde_json::from_str::<serde_json::Value>(text).unwrap();
        }
    };
    assert_eq!(answer["type"], "answer");
    assert!(answer["sdp"].as_str().unwrap().starts_with("v=0\r\n"));

    let pushed = loop {
        let message = tokio::time::timeout(wait, client.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("valid message");
        if message.is_binary() {
            break message.into_payload();
        }
    };
    assert_eq!(&pushed[..], &frame[..]);

    client
        .send(Message::text(
            r#"{"type":"ice-candidate","candidate":"candidate:0 1 UDP 1 127.0.0.1 9 typ host"}"#.to_string(),
        ))
        .await
        .unwrap();
    let ack = loop {
        let message = tokio::time::timeout(wait, client.next())
            .await
            .expect("ack in time")
            .expect("stream open")
            .expect("valid message");
        if let Some(text) = message.as_text() {
            break text.to_string();
        }
    };
    assert_eq!(ack, r#"{"type":"ice-ack"}"#);

    let _ = client.close().await;
    scheduler.stop();
}

#[test]
fn stalled_viewer_is_dropped_and_frame_returned() {
    let mut config = test_config(VideoProtocol::Http, 18_620);
    config.frame_interval_ms = 5;
    config.stall_timeout_ms = 100;
    let camera = ScriptedCamera::repeating(test_frame(256 * 1024));
    let mut scheduler = start_with_camera(&config, &camera);

    // Never reads, so the socket buffers fill and writes stall.
    let mut stalled = connect(config.ports.http);
    stalled.write_all(b"GET /video HTTP/1.1\r\n\r\n").unwrap();

    let deadline = Instant::now() + Duration::from_secs(15);
    let mut replacement = loop {
        assert!(Instant::now() < deadline, "stalled viewer was never dropped");
        let mut next = BufReader::new(connect(config.ports.http));
        next.get_mut().write_all(b"GET /video HTTP/1.1\r\n\r\n").unwrap();
        let head = read_response(&mut next).unwrap();
        if head.starts_with("HTTP/1.1 200 OK\r\n") {
            break next;
        }
        assert!(head.starts_with("HTTP/1.1 503"), "{head}");
        thread::sleep(Duration::from_millis(100));
    };
    assert!(read_chunk(&mut replacement).is_some());

    scheduler.stop();
    drop(stalled);
    assert!(camera.grabs() > 0);
    assert_eq!(camera.grabs(), camera.returned());
}

#[tokio::test]
async fn websocket_disconnect_stops_pushing() {
    let config = test_config(VideoProtocol::WebSocket, 18_610);
    let camera = ScriptedCamera::repeating(test_frame(512));
    let state = Arc::new(Mutex::new(SignalingState::Disconnected));
    let running = Arc::new(AtomicBool::new(true));
    let (ready_tx, ready_rx) = mpsc::channel();

    // Pump the adapter by hand so its signaling state can be observed.
    let pump = {
        let config = config.clone();
        let camera = camera.clone();
        let state = state.clone();
        let running = running.clone();
        thread::spawn(move || {
            let mut adapter = WebSocketSignalingAdapter::new(&config);
            let mut source = FrameSource::new(Box::new(camera), &config.capture);
            adapter.initialize().unwrap();
            ready_tx.send(()).unwrap();
            while running.load(Ordering::SeqCst) {
                let _ = adapter.pump(&mut source);
                *state.lock() = adapter.state();
                thread::sleep(Duration::from_millis(5));
            }
        })
    };
    ready_rx.recv_timeout(Duration::from_secs(2)).expect("adapter ready");

    let uri = format!("ws://127.0.0.1:{}", config.ports.websocket);
    let (mut client, _response) = ClientBuilder::from_uri(uri.parse().unwrap())
        .connect()
        .await
        .expect("websocket connect");
    client
        .send(Message::text(r#"{"type":"offer"}"#.to_string()))
        .await
        .unwrap();

    let wait = Duration::from_secs(3);
    loop {
        let message = tokio::time::timeout(wait, client.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("valid message");
        if message.is_binary() {
            break;
        }
    }
    let deadline = Instant::now() + wait;
    while *state.lock() == SignalingState::Disconnected {
        assert!(Instant::now() < deadline, "offer never answered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let _ = client.close().await;
    drop(client);

    let deadline = Instant::now() + wait;
    while *state.lock() != SignalingState::Disconnected {
        assert!(Instant::now() < deadline, "adapter never saw the disconnect");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let grabs = camera.grabs();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(camera.grabs(), grabs, "frames captured after disconnect");
    assert_eq!(camera.grabs(), camera.returned());

    running.store(false, Ordering::SeqCst);
    pump.join().unwrap();
}

/// Accepts `limit` datagrams, then fails every send with `kind`.
struct FailingSink {
    limit: usize,
    kind: io::ErrorKind,
    sent: Cell<usize>,
}

impl FailingSink {
    fn new(limit: usize, kind: io::ErrorKind) -> Self {
        Self {
            limit,
            kind,
            sent: Cell::new(0),
        }
    }
}

impl DatagramSink for FailingSink {
    fn send_datagram(&self, payload: &[u8], _dest: SocketAddr) -> io::Result<usize> {
        if self.sent.get() >= self.limit {
            return Err(self.kind.into());
        }
        self.sent.set(self.sent.get() + 1);
        Ok(payload.len())
    }
}

fn sink_dest() -> SocketAddr {
    "127.0.0.1:9".parse().unwrap()
}

#[test]
fn rtp_full_send_buffer_abandons_frame() {
    let sink = FailingSink::new(2, io::ErrorKind::WouldBlock);
    let packets = vec![vec![0u8; 100]; 5];
    let result = rtsp::send_packets(&sink, sink_dest(), &packets, 42);
    assert!(matches!(result, Err(StreamError::TransportStall { frame: 42 })), "{result:?}");
    assert_eq!(sink.sent.get(), 2);

    let sink = FailingSink::new(0, io::ErrorKind::ConnectionRefused);
    let result = rtsp::send_packets(&sink, sink_dest(), &packets, 43);
    assert!(matches!(result, Err(StreamError::Io(_))), "{result:?}");
}

#[test]
fn udp_full_send_buffer_abandons_frame() {
    let sink = FailingSink::new(1, io::ErrorKind::WouldBlock);
    let mut datagram = Vec::new();
    let result = udp::send_fragments(&sink, sink_dest(), &mut datagram, 7, &test_frame(5000), 9);
    assert!(matches!(result, Err(StreamError::TransportStall { frame: 9 })), "{result:?}");
    assert_eq!(sink.sent.get(), 1);

    let sink = FailingSink::new(usize::MAX, io::ErrorKind::WouldBlock);
    udp::send_fragments(&sink, sink_dest(), &mut datagram, 8, &test_frame(5000), 10).unwrap();
    assert_eq!(sink.sent.get(), 4);
}

/// One-shot HTTP exchange with the control port.
fn control_request(port: u16, request: &str) -> String {
    let mut reader = BufReader::new(connect(port));
    reader.get_mut().write_all(request.as_bytes()).unwrap();
    read_response(&mut reader).unwrap()
}

fn post_control(port: u16, body: &str) -> String {
    control_request(
        port,
        &format!(
            "POST /control HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ),
    )
}

#[test]
fn http_control_status_and_commands() {
    let config = test_config(VideoProtocol::Udp, 18_630);
    assert_eq!(config.control_protocol, ControlProtocol::Http);
    let mut scheduler = start_pipeline(&config, test_frame(100));
    let port = config.ports.control_http;

    let status = control_request(port, "GET /status HTTP/1.1\r\n\r\n");
    assert!(status.starts_with("HTTP/1.1 200 OK\r\n"), "{status}");
    assert!(status.contains("Content-Type: application/json\r\n"));
    assert!(status.ends_with(r#"{"pan":0,"tilt":0,"zoom":0,"led":false,"brightness":50}"#));

    let reply = post_control(port, r#"{"pan":150,"led":true}"#);
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "{reply}");
    assert!(reply.ends_with(ACK));

    let status = control_request(port, "GET /status HTTP/1.1\r\n\r\n");
    let (_, body) = status.split_once("\r\n\r\n").unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["pan"], 100);
    assert_eq!(json["led"], true);

    let bad = post_control(port, "{pan:");
    assert!(bad.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{bad}");
    assert!(bad.ends_with("Invalid JSON"));

    let missing = control_request(port, "POST /elsewhere HTTP/1.1\r\n\r\n");
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"), "{missing}");

    scheduler.stop();
}

async fn next_text<S>(client: &mut S) -> String
where
    S: futures_util::Stream<Item = Result<Message, tokio_websockets::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(3), client.next())
            .await
            .expect("message in time")
            .expect("stream open")
            .expect("valid message");
        if let Some(text) = message.as_text() {
            return text.to_string();
        }
    }
}

#[tokio::test]
async fn websocket_control_sends_state_and_acks() {
    let mut config = test_config(VideoProtocol::Udp, 18_640);
    config.control_protocol = ControlProtocol::WebSocket;
    let start_config = config.clone();
    let mut scheduler = thread::spawn(move || start_pipeline(&start_config, test_frame(100)))
        .join()
        .expect("start thread");

    let uri = format!("ws://127.0.0.1:{}", config.ports.control_websocket);
    let (mut client, _response) = ClientBuilder::from_uri(uri.parse().unwrap())
        .connect()
        .await
        .expect("websocket connect");

    let greeting = next_text(&mut client).await;
    assert_eq!(greeting, r#"{"pan":0,"tilt":0,"zoom":0,"led":false,"brightness":50}"#);

    client
        .send(Message::text("not json".to_string()))
        .await
        .unwrap();
    client
        .send(Message::text(r#"{"zoom":-250,"brightness":70}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut client).await, ACK);

    // A second connection replaces the first and sees the applied state.
    let (mut second, _response) = ClientBuilder::from_uri(uri.parse().unwrap())
        .connect()
        .await
        .expect("second connect");
    let state: serde_json::Value = serde_json::from_str(&next_text(&mut second).await).unwrap();
    assert_eq!(state["zoom"], -100);
    assert_eq!(state["brightness"], 70);

    let _ = second.close().await;
    drop(client);
    scheduler.stop();
}
