//! Frame acquisition for the streaming pipeline.
//!
//! Every source yields BGR8 [`Frame`]s over a small bounded channel; the
//! buffer is intentionally tiny so the capture loop is backpressured when
//! downstream consumers fall behind. Real cameras and network feeds are
//! decoded by an FFmpeg child process; [`spawn_test_pattern`] provides a
//! camera-free source for development and tests.

mod ffmpeg;
mod pattern;
mod types;

pub use ffmpeg::{spawn_device_reader, spawn_rtsp_reader, spawn_udp_reader};
pub use pattern::spawn_test_pattern;
pub use types::{CaptureError, Frame, FrameFormat};
