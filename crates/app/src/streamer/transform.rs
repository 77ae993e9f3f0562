//! Per-stream frame transforms and the JPEG encoder.
//!
//! Transforms are pure: each operates on the packet's private frame copy and
//! never touches shared state. Drawing sticks to plain pixel loops over an
//! `RgbImage`; the blur stream leans on `image::imageops` for the Gaussian
//! pass.

use anyhow::{Result, anyhow};
use detect_core::{BoundingBox, Detection};
use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder, imageops};
use video_ingest::Frame;

const OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BG: Rgb<u8> = Rgb([0, 0, 0]);
const LABEL_FG: Rgb<u8> = Rgb([0, 255, 0]);

/// Convert a BGR frame into an owned RGB image buffer.
pub(crate) fn frame_to_rgb(frame: &Frame) -> Result<RgbImage> {
    let width = frame.width.max(0) as u32;
    let height = frame.height.max(0) as u32;
    RgbImage::from_vec(width, height, bgr_to_rgb(&frame.data))
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
    }
    output
}

/// Outline every detection and stamp a confidence label above it.
pub(crate) fn annotate_overlay(image: &mut RgbImage, detections: &[Detection]) {
    for det in detections {
        draw_rectangle(
            image,
            det.bbox.x1,
            det.bbox.y1,
            det.bbox.x2,
            det.bbox.y2,
            OUTLINE,
        );
    }

    for det in detections {
        let label = format!("PERSON {:.0}%", det.score * 100.0);
        let label_x = det.bbox.x1;
        let label_y = (det.bbox.y1 - 12).max(0);
        let text_width = label.chars().count() as i32 * 6;
        fill_rect(
            image,
            label_x,
            label_y,
            label_x + text_width,
            label_y + 8,
            LABEL_BG,
        );
        draw_label(image, label_x + 1, label_y + 1, &label, LABEL_FG);
    }
}

/// Replace the upper face region of every box with a Gaussian-blurred copy.
///
/// The region height is `box height * fraction`, clipped to frame bounds;
/// boxes entirely outside the frame are skipped.
pub(crate) fn blur_regions(image: &mut RgbImage, boxes: &[BoundingBox], fraction: f32, sigma: f32) {
    let width = image.width() as i32;
    let height = image.height() as i32;

    for b in boxes {
        let region_h = ((b.height() as f32) * fraction).round() as i32;
        let x1 = b.x1.clamp(0, width);
        let x2 = b.x2.clamp(0, width);
        let y1 = b.y1.clamp(0, height);
        let y2 = (b.y1 + region_h).clamp(0, height);
        if x2 - x1 < 1 || y2 - y1 < 1 {
            continue;
        }

        let (rx, ry) = (x1 as u32, y1 as u32);
        let (rw, rh) = ((x2 - x1) as u32, (y2 - y1) as u32);
        let region = imageops::crop_imm(&*image, rx, ry, rw, rh).to_image();
        let blurred = imageops::blur(&region, sigma.max(0.1));
        imageops::replace(image, &blurred, i64::from(rx), i64::from(ry));
    }
}

/// JPEG-encode an image at the configured quality.
pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for x in left..=right {
        *image.get_pixel_mut(x as u32, top as u32) = color;
        *image.get_pixel_mut(x as u32, bottom as u32) = color;
    }
    for y in top..=bottom {
        *image.get_pixel_mut(left as u32, y as u32) = color;
        *image.get_pixel_mut(right as u32, y as u32) = color;
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            *image.get_pixel_mut(px as u32, py as u32) = color;
                        }
                    }
                }
            }
        }
        x += 6;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'P' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000,
        ]),
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'R' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001,
        ]),
        'S' => Some([
            0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        'O' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'N' => Some([
            0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        '%' => Some([
            0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000,
        ]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}
