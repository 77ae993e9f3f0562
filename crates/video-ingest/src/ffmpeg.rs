use std::{
    io::Read,
    process::{Child, Command, Stdio},
    thread,
};

use anyhow::{Result, anyhow};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::types::{CaptureError, Frame, FrameFormat};

/// Spawns an FFmpeg process reading a local V4L device and yields BGR8 frames
/// via a background thread.
pub fn spawn_device_reader(
    uri: &str,
    target_size: (i32, i32),
    framerate: u32,
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    spawn_ffmpeg_reader(device_command(uri, target_size, framerate), target_size, 3)
}

/// Spawns an FFmpeg process that pulls an RTSP feed over TCP and yields BGR8
/// frames via a background thread.
pub fn spawn_rtsp_reader(
    uri: &str,
    target_size: (i32, i32),
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    spawn_ffmpeg_reader(rtsp_command(uri, target_size), target_size, 4)
}

/// Spawns an FFmpeg process receiving an MPEG-TS stream on a UDP port and
/// yields BGR8 frames via a background thread.
pub fn spawn_udp_reader(
    uri: &str,
    target_size: (i32, i32),
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    spawn_ffmpeg_reader(udp_command(uri, target_size), target_size, 4)
}

fn device_command(uri: &str, target_size: (i32, i32), framerate: u32) -> Command {
    let device = if let Some(index) = parse_device_index(uri) {
        format!("/dev/video{index}")
    } else {
        uri.to_string()
    };

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-f")
        .arg("video4linux2")
        .arg("-framerate")
        .arg(framerate.to_string())
        .arg("-i")
        .arg(&device);
    push_output_args(&mut cmd, target_size);
    cmd
}

fn rtsp_command(uri: &str, target_size: (i32, i32)) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-rtsp_transport")
        .arg("tcp")
        .arg("-fflags")
        .arg("nobuffer")
        .arg("-flags")
        .arg("low_delay")
        .arg("-max_delay")
        .arg("0")
        .arg("-i")
        .arg(uri)
        .arg("-an");
    push_output_args(&mut cmd, target_size);
    cmd
}

fn udp_command(uri: &str, target_size: (i32, i32)) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-fflags")
        .arg("+genpts+discardcorrupt")
        .arg("-flags")
        .arg("low_delay")
        .arg("-i")
        .arg(uri)
        .arg("-an");
    push_output_args(&mut cmd, target_size);
    cmd
}

fn push_output_args(cmd: &mut Command, target_size: (i32, i32)) {
    cmd.arg("-vf")
        .arg(format!("scale={}:{}", target_size.0, target_size.1))
        .arg("-pix_fmt")
        .arg("bgr24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-");
}

pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    uri.parse::<i32>().ok()
}

fn spawn_ffmpeg_reader(
    mut cmd: Command,
    target_size: (i32, i32),
    queue_size: usize,
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let (tx, rx) = bounded(queue_size);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd.spawn().map_err(|err| CaptureError::Other(err.into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

    thread::spawn(move || {
        let tx_clone = tx.clone();
        if let Err(err) = ffmpeg_loop(stdout, child, target_size, tx_clone) {
            let _ = tx.send(Err(err));
        }
    });

    Ok(rx)
}

fn ffmpeg_loop(
    mut stdout: impl Read,
    mut child: Child,
    target_size: (i32, i32),
    tx: Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let frame_bytes = Frame::byte_len(target_size.0, target_size.1);
    let mut buffer = vec![0u8; frame_bytes];
    let mut result = Ok(());

    loop {
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                let timestamp_ms = Utc::now().timestamp_millis();
                if tx
                    .send(Ok(Frame {
                        data: buffer.clone(),
                        width: target_size.0,
                        height: target_size.1,
                        timestamp_ms,
                        format: FrameFormat::Bgr8,
                    }))
                    .is_err()
                {
                    break;
                }
            }
            Err(err) => {
                result = Err(CaptureError::Other(err.into()));
                break;
            }
        }
    }

    let _ = child.kill();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_parse_device_index() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("2"), Some(2));
        assert_eq!(parse_device_index("/dev/video0"), None);
        assert_eq!(parse_device_index("rtsp://cam"), None);
    }

    #[test]
    fn test_device_command_resolves_index() {
        let cmd = device_command("0", (640, 480), 30);
        assert_eq!(cmd.get_program(), OsStr::new("ffmpeg"));
        let args = args_of(&cmd);
        assert!(args.contains(&"/dev/video0".to_string()));
        assert!(args.contains(&"video4linux2".to_string()));
        assert!(args.contains(&"scale=640:480".to_string()));
        assert!(args.contains(&"bgr24".to_string()));
    }

    #[test]
    fn test_rtsp_command_uses_tcp_transport() {
        let cmd = rtsp_command("rtsp://cam/stream", (320, 240));
        let args = args_of(&cmd);
        let transport_idx = args
            .iter()
            .position(|a| a == "-rtsp_transport")
            .expect("missing transport flag");
        assert_eq!(args[transport_idx + 1], "tcp");
        assert!(args.contains(&"rtsp://cam/stream".to_string()));
        assert!(args.contains(&"rawvideo".to_string()));
    }

    #[test]
    fn test_udp_command_passes_uri_through() {
        let cmd = udp_command("udp://0.0.0.0:5000", (640, 480));
        let args = args_of(&cmd);
        assert!(args.contains(&"udp://0.0.0.0:5000".to_string()));
        assert!(args.contains(&"scale=640:480".to_string()));
    }
}
