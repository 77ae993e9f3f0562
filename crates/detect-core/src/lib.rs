//! Detection types and the seam to the external inference engine.
//!
//! The pipeline consumes detections as a pure function of a frame; the
//! engine itself (TorchScript, ONNX, ...) lives outside this workspace and
//! plugs in through the [`Detector`] trait. The built-in
//! [`SyntheticDetector`] keeps the pipeline runnable without one.

mod detector;

pub use detector::{
    BoundingBox, Detection, Detector, DetectorConfig, DetectorError, SyntheticDetector,
    load_detector,
};
