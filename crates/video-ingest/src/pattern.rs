use std::{thread, time::Duration};

use chrono::Utc;
use crossbeam_channel::{Receiver, bounded};

use crate::types::{CaptureError, Frame, FrameFormat};

/// Spawns a camera-free frame source producing a deterministic moving test
/// pattern, paced at `framerate`.
///
/// Useful for bringing the pipeline up on machines without a camera and for
/// integration tests. The pattern is a dark gradient background with a bright
/// vertical bar sweeping left to right once per `width` frames.
pub fn spawn_test_pattern(
    target_size: (i32, i32),
    framerate: u32,
) -> Receiver<Result<Frame, CaptureError>> {
    let (tx, rx) = bounded(2);
    let interval = Duration::from_secs_f64(1.0 / f64::from(framerate.max(1)));

    thread::spawn(move || {
        let (width, height) = target_size;
        let mut tick: i32 = 0;
        loop {
            let frame = Frame {
                data: render_pattern(width, height, tick),
                width,
                height,
                timestamp_ms: Utc::now().timestamp_millis(),
                format: FrameFormat::Bgr8,
            };
            if tx.send(Ok(frame)).is_err() {
                break;
            }
            tick = tick.wrapping_add(1);
            thread::sleep(interval);
        }
    });

    rx
}

fn render_pattern(width: i32, height: i32, tick: i32) -> Vec<u8> {
    let w = width.max(0) as usize;
    let h = height.max(0) as usize;
    let mut data = vec![0u8; w * h * 3];
    let bar = if width > 0 { (tick.rem_euclid(width)) as usize } else { 0 };

    for y in 0..h {
        let shade = if h > 1 { (y * 96 / (h - 1)) as u8 } else { 0 };
        for x in 0..w {
            let idx = (y * w + x) * 3;
            if x == bar {
                data[idx] = 255;
                data[idx + 1] = 255;
                data[idx + 2] = 255;
            } else {
                data[idx] = shade;
                data[idx + 1] = shade / 2;
                data[idx + 2] = 32;
            }
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_dimensions() {
        let data = render_pattern(8, 4, 0);
        assert_eq!(data.len(), Frame::byte_len(8, 4));
    }

    #[test]
    fn test_pattern_bar_moves() {
        let a = render_pattern(8, 4, 0);
        let b = render_pattern(8, 4, 1);
        assert_ne!(a, b);
        // Bar wraps around after one full sweep.
        let wrapped = render_pattern(8, 4, 8);
        assert_eq!(a, wrapped);
    }
}
