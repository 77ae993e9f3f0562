use std::path::PathBuf;

use anyhow::Result;
use thiserror::Error;

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// A box is usable only when it has positive extent on both axes.
    pub fn is_valid(&self) -> bool {
        self.x2 > self.x1 && self.y2 > self.y1
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// Single person detection returned by a detector backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub score: f32,
    pub bbox: BoundingBox,
}

/// Immutable model-side configuration consumed at startup.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Engine model weights; `None` selects the built-in synthetic backend.
    pub model_path: Option<PathBuf>,
    /// Size frames are resized to before inference.
    pub input_size: (u32, u32),
    /// Minimum score a detection must reach to be reported.
    pub conf_threshold: f32,
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error(
        "no detector backend available for model {0:?}; engine backends attach through the Detector trait"
    )]
    UnsupportedModel(PathBuf),
}

/// Seam to the external inference engine.
///
/// Implementations consume one BGR frame and return detections in the
/// engine's output order.
pub trait Detector: Send + std::fmt::Debug {
    fn detect(&mut self, bgr: &[u8], width: i32, height: i32) -> Result<Vec<Detection>>;

    /// Human-readable backend description for startup logging.
    fn describe(&self) -> String;
}

/// Build the detector selected by `config`.
pub fn load_detector(config: &DetectorConfig) -> Result<Box<dyn Detector>> {
    match &config.model_path {
        None => Ok(Box::new(SyntheticDetector::new(config.conf_threshold))),
        Some(path) => Err(DetectorError::UnsupportedModel(path.clone()).into()),
    }
}

/// Model-free detector emitting a deterministic walking person box.
///
/// Used for pipeline bring-up on machines without an engine runtime, and by
/// the integration tests. The primary box sweeps the frame horizontally with
/// a sawtooth confidence; a second, lower-confidence box joins it on
/// alternating phases.
#[derive(Debug)]
pub struct SyntheticDetector {
    conf_threshold: f32,
    tick: u64,
}

impl SyntheticDetector {
    pub fn new(conf_threshold: f32) -> Self {
        Self {
            conf_threshold,
            tick: 0,
        }
    }
}

impl Detector for SyntheticDetector {
    fn detect(&mut self, bgr: &[u8], width: i32, height: i32) -> Result<Vec<Detection>> {
        let expected = (width.max(0) as usize) * (height.max(0) as usize) * 3;
        if bgr.len() != expected {
            anyhow::bail!(
                "unexpected frame buffer size: got {} bytes, expected {}",
                bgr.len(),
                expected
            );
        }
        if width < 4 || height < 4 {
            return Ok(Vec::new());
        }

        let t = self.tick;
        self.tick = self.tick.wrapping_add(1);

        let box_w = (width / 4).max(2);
        let box_h = (height / 2).max(2);
        let span = (width - box_w).max(1);

        let x1 = ((t as i32).wrapping_mul(3)).rem_euclid(span);
        let y1 = height / 4;
        let primary = Detection {
            score: 0.60 + 0.0375 * ((t % 10) as f32),
            bbox: BoundingBox::new(x1, y1, x1 + box_w, y1 + box_h),
        };

        let mut detections = vec![primary];
        if (t / 10) % 2 == 0 {
            let sx1 = (width - box_w / 2 - 1).max(0);
            detections.push(Detection {
                score: 0.5,
                bbox: BoundingBox::new(sx1, 0, width - 1, box_h / 2 + 1),
            });
        }

        detections.retain(|d| d.score >= self.conf_threshold);
        Ok(detections)
    }

    fn describe(&self) -> String {
        format!("synthetic detector (conf >= {:.2})", self.conf_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_validity() {
        assert!(BoundingBox::new(0, 0, 1, 1).is_valid());
        assert!(!BoundingBox::new(10, 10, 10, 20).is_valid());
        assert!(!BoundingBox::new(10, 10, 20, 10).is_valid());
        assert!(!BoundingBox::new(5, 5, 4, 4).is_valid());
    }

    #[test]
    fn test_synthetic_rejects_bad_buffer() {
        let mut detector = SyntheticDetector::new(0.25);
        assert!(detector.detect(&[0u8; 10], 64, 64).is_err());
    }
}
