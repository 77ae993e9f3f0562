//! Configuration parsing for the streaming pipeline.
//!
//! CLI arguments are validated once into an immutable [`StreamConfig`] that
//! every stage consumes by reference; nothing re-reads flags at runtime.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Result, bail};
use clap::Parser;

use crate::streamer::data::StreamKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Ingress transport used to source frames.
pub enum SourceKind {
    /// Local V4L devices, by index or path.
    Device,
    /// Real-time streaming protocol feeds.
    Rtsp,
    /// UDP socket carrying an MPEG-TS stream.
    Udp,
    /// Built-in synthetic test pattern, no camera required.
    Test,
}

impl SourceKind {
    /// Infer the transport kind from a URI.
    pub(crate) fn from_uri(uri: &str) -> Self {
        if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
            SourceKind::Rtsp
        } else if uri.starts_with("udp://") {
            SourceKind::Udp
        } else if uri.starts_with("test://") {
            SourceKind::Test
        } else {
            SourceKind::Device
        }
    }
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every stage in the pipeline.
pub struct StreamConfig {
    /// Camera URI or device identifier.
    pub source_uri: String,
    /// Source transport used to acquire frames.
    pub source_kind: SourceKind,
    /// Capture width in pixels.
    pub width: i32,
    /// Capture height in pixels.
    pub height: i32,
    /// Capture framerate in frames per second.
    pub framerate: u32,
    /// Engine model weights; `None` selects the synthetic detector.
    pub model_path: Option<PathBuf>,
    /// Detector input size (square).
    pub input_size: u32,
    /// Minimum confidence for a detection to be streamed.
    pub conf_threshold: f32,
    /// Destination host shared by every stream endpoint.
    pub host: IpAddr,
    /// Raw frame stream port.
    pub port_raw: u16,
    /// Coordinates stream port (fed by the overlay worker).
    pub port_coords: u16,
    /// Blurred frame stream port.
    pub port_blur: u16,
    /// Metadata stream port.
    pub port_meta: u16,
    /// Enabled stream kinds; drives queue, worker, and barrier construction.
    pub streams: Vec<StreamKind>,
    /// JPEG quality used by the frame-carrying streams.
    pub jpeg_quality: u8,
    /// Fraction of each box height blurred from the top.
    pub blur_fraction: f32,
    /// Gaussian blur strength.
    pub blur_sigma: f32,
    /// Round rendezvous timeout in milliseconds.
    pub barrier_timeout_ms: u64,
    /// Write per-stream "latest" snapshots.
    pub debug: bool,
    /// Snapshot directory.
    pub debug_dir: PathBuf,
    /// Emit verbose logging (frame drops, detection details).
    pub verbose: bool,
    /// Expose Prometheus metrics on this address.
    pub metrics_addr: Option<SocketAddr>,
}

impl StreamConfig {
    /// UDP endpoint a stream kind transmits to.
    pub fn endpoint(&self, kind: StreamKind) -> SocketAddr {
        let port = match kind {
            StreamKind::Raw => self.port_raw,
            StreamKind::Overlay => self.port_coords,
            StreamKind::Blur => self.port_blur,
            StreamKind::Meta => self.port_meta,
        };
        SocketAddr::new(self.host, port)
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        if args.width <= 0 || args.height <= 0 {
            bail!("frame dimensions must be positive");
        }
        if args.framerate == 0 {
            bail!("framerate must be at least 1");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be between 1 and 100");
        }
        if !(args.blur_fraction > 0.0 && args.blur_fraction <= 1.0) {
            bail!("--blur-fraction must be in (0, 1]");
        }
        if args.blur_sigma <= 0.0 {
            bail!("--blur-sigma must be positive");
        }
        if !(0.0..=1.0).contains(&args.conf_threshold) {
            bail!("--conf-threshold must be in [0, 1]");
        }
        if args.barrier_timeout_ms == 0 {
            bail!("--barrier-timeout-ms must be positive");
        }

        let mut streams: Vec<StreamKind> = Vec::new();
        for kind in args.streams {
            if !streams.contains(&kind) {
                streams.push(kind);
            }
        }
        if streams.is_empty() {
            bail!("at least one stream kind must be enabled");
        }

        let source_kind = SourceKind::from_uri(&args.source_uri);

        Ok(Self {
            source_uri: args.source_uri,
            source_kind,
            width: args.width,
            height: args.height,
            framerate: args.framerate,
            model_path: args.model_path,
            input_size: args.input_size,
            conf_threshold: args.conf_threshold,
            host: args.host,
            port_raw: args.port_raw,
            port_coords: args.port_coords,
            port_blur: args.port_blur,
            port_meta: args.port_meta,
            streams,
            jpeg_quality: args.jpeg_quality,
            blur_fraction: args.blur_fraction,
            blur_sigma: args.blur_sigma,
            barrier_timeout_ms: args.barrier_timeout_ms,
            debug: args.debug,
            debug_dir: args.debug_dir,
            verbose: args.verbose,
            metrics_addr: args.metrics_addr,
        })
    }
}

/// CLI arguments accepted by the streamer binary.
#[derive(Debug, Parser)]
#[command(about = "Synchronized person-detection fan-out over UDP")]
pub struct CliArgs {
    /// Camera URI or device identifier ("0", "/dev/video0", "rtsp://...",
    /// "udp://...", "test://pattern").
    #[arg(long = "source", value_name = "URI", default_value = "0")]
    pub source_uri: String,
    /// Capture width in pixels.
    #[arg(long, value_name = "PX", default_value_t = 640)]
    pub width: i32,
    /// Capture height in pixels.
    #[arg(long, value_name = "PX", default_value_t = 480)]
    pub height: i32,
    /// Capture framerate.
    #[arg(long, value_name = "FPS", default_value_t = 30)]
    pub framerate: u32,
    /// Engine model weights; omit to run the synthetic detector.
    #[arg(long = "model", value_name = "PATH")]
    pub model_path: Option<PathBuf>,
    /// Detector input size (square).
    #[arg(long = "input-size", value_name = "PX", default_value_t = 640)]
    pub input_size: u32,
    /// Minimum confidence for a detection to be streamed.
    #[arg(long = "conf-threshold", value_name = "SCORE", default_value_t = 0.25)]
    pub conf_threshold: f32,
    /// Destination host for every stream.
    #[arg(long, value_name = "HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,
    /// Raw frame stream port.
    #[arg(long = "port-raw", value_name = "PORT", default_value_t = 5006)]
    pub port_raw: u16,
    /// Coordinates stream port.
    #[arg(long = "port-coords", value_name = "PORT", default_value_t = 5007)]
    pub port_coords: u16,
    /// Blurred frame stream port.
    #[arg(long = "port-blur", value_name = "PORT", default_value_t = 5008)]
    pub port_blur: u16,
    /// Metadata stream port.
    #[arg(long = "port-meta", value_name = "PORT", default_value_t = 5009)]
    pub port_meta: u16,
    /// Comma-separated stream kinds to enable.
    #[arg(
        long,
        value_name = "KINDS",
        value_delimiter = ',',
        default_value = "raw,overlay,blur,meta"
    )]
    pub streams: Vec<StreamKind>,
    /// JPEG quality for frame-carrying streams (1-100).
    #[arg(long = "jpeg-quality", value_name = "Q", default_value_t = 50)]
    pub jpeg_quality: u8,
    /// Fraction of each box height blurred from the top.
    #[arg(long = "blur-fraction", value_name = "F", default_value_t = 0.4)]
    pub blur_fraction: f32,
    /// Gaussian blur strength.
    #[arg(long = "blur-sigma", value_name = "SIGMA", default_value_t = 6.0)]
    pub blur_sigma: f32,
    /// Round rendezvous timeout in milliseconds.
    #[arg(long = "barrier-timeout-ms", value_name = "MS", default_value_t = 500)]
    pub barrier_timeout_ms: u64,
    /// Write per-stream "latest" snapshots.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub debug: bool,
    /// Snapshot directory.
    #[arg(long = "debug-dir", value_name = "DIR", default_value = "debug_frames")]
    pub debug_dir: PathBuf,
    /// Emit verbose logging (frame drops, detection details).
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Expose Prometheus metrics on this address (e.g. 127.0.0.1:9090).
    #[arg(long = "metrics-addr", value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<StreamConfig> {
        let mut argv = vec!["app"];
        argv.extend_from_slice(extra);
        StreamConfig::from_args(CliArgs::parse_from(argv))
    }

    #[test]
    fn test_source_kind_inference() {
        assert_eq!(SourceKind::from_uri("rtsp://cam/stream"), SourceKind::Rtsp);
        assert_eq!(SourceKind::from_uri("udp://0.0.0.0:5000"), SourceKind::Udp);
        assert_eq!(SourceKind::from_uri("test://pattern"), SourceKind::Test);
        assert_eq!(SourceKind::from_uri("/dev/video0"), SourceKind::Device);
        assert_eq!(SourceKind::from_uri("0"), SourceKind::Device);
    }

    #[test]
    fn test_defaults_build() {
        let config = parse(&[]).expect("defaults rejected");
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 480);
        assert_eq!(config.streams, StreamKind::ALL.to_vec());
        assert_eq!(config.jpeg_quality, 50);
        assert!(config.model_path.is_none());
        assert_eq!(
            config.endpoint(StreamKind::Meta),
            "127.0.0.1:5009".parse().unwrap()
        );
    }

    #[test]
    fn test_stream_selection_dedupes_and_preserves_order() {
        let config = parse(&["--streams", "meta,raw,meta"]).expect("selection rejected");
        assert_eq!(config.streams, vec![StreamKind::Meta, StreamKind::Raw]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(parse(&["--width", "0"]).is_err());
        assert!(parse(&["--jpeg-quality", "0"]).is_err());
        assert!(parse(&["--blur-fraction", "1.5"]).is_err());
        assert!(parse(&["--conf-threshold", "2.0"]).is_err());
        assert!(parse(&["--barrier-timeout-ms", "0"]).is_err());
    }

    #[test]
    fn test_unknown_stream_kind_is_rejected_by_clap() {
        assert!(CliArgs::try_parse_from(["app", "--streams", "crop"]).is_err());
    }
}
