use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use camstream::config::Resolution;
use camstream::control::LedActuator;
use camstream::source::SyntheticCamera;
use camstream::{ControlContext, ControlProtocol, Scheduler, StreamConfig, VideoContext, VideoProtocol};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "camstream",
    about = "Stream a camera over HTTP MJPEG, RTSP, UDP broadcast or WebSocket"
)]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Video protocol: http, rtsp, udp or websocket
    #[arg(long, short, value_parser = parse_protocol)]
    protocol: Option<VideoProtocol>,

    /// Control transport: http, udp or websocket
    #[arg(long, value_parser = parse_control)]
    control: Option<ControlProtocol>,

    /// Address to bind every listener on
    #[arg(long, short)]
    bind: Option<IpAddr>,

    /// Target time between frames
    #[arg(long)]
    frame_interval_ms: Option<u64>,

    /// Sensor resolution: qqvga, qvga, vga, svga, xga, sxga or uxga
    #[arg(long, short, value_parser = parse_resolution)]
    resolution: Option<Resolution>,

    /// Disable per-frame timing logs
    #[arg(long)]
    no_metrics: bool,
}

fn parse_protocol(s: &str) -> Result<VideoProtocol, String> {
    VideoProtocol::parse(s).ok_or_else(|| format!("unknown protocol '{s}'"))
}

fn parse_control(s: &str) -> Result<ControlProtocol, String> {
    ControlProtocol::parse(s).ok_or_else(|| format!("unknown control protocol '{s}'"))
}

fn parse_resolution(s: &str) -> Result<Resolution, String> {
    Resolution::parse(s).ok_or_else(|| format!("unknown resolution '{s}'"))
}

fn load_config(args: &Args) -> camstream::Result<StreamConfig> {
    let mut config = match &args.config {
        Some(path) => StreamConfig::from_file(path)?,
        None => StreamConfig::default(),
    };
    if let Some(protocol) = args.protocol {
        config.video_protocol = protocol;
    }
    if let Some(control) = args.control {
        config.control_protocol = control;
    }
    if let Some(bind) = args.bind {
        config.bind_host = bind;
    }
    if let Some(interval) = args.frame_interval_ms {
        config.frame_interval_ms = interval;
    }
    if let Some(resolution) = args.resolution {
        config.camera.resolution = resolution;
    }
    if args.no_metrics {
        config.metrics_enabled = false;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let camera = SyntheticCamera::new(config.camera.clone());
    let video = VideoContext::from_config(&config, Box::new(camera));
    let control = match ControlContext::from_config(&config, Box::new(LedActuator::new())) {
        Ok(control) => control,
        Err(e) => {
            eprintln!("Failed to open control port: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut scheduler = Scheduler::new();
    if let Err(e) = scheduler.start(video, control) {
        eprintln!("Failed to start pipeline: {e}");
        return ExitCode::FAILURE;
    }

    println!(
        "Streaming {:?} on {} (control {:?} on port {}), press Enter to stop",
        config.video_protocol,
        config.bind_host,
        config.control_protocol,
        config.control_port()
    );
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        tracing::warn!(error = %e, "stdin closed");
    }

    scheduler.stop();
    ExitCode::SUCCESS
}
