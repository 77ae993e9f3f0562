use thiserror::Error;

/// Raw BGR frame captured from a video source.
///
/// Frames are cloned whenever more than one consumer needs the pixels; no two
/// pipeline stages ever share a mutable buffer.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Number of bytes a frame of the given dimensions occupies.
    pub fn byte_len(width: i32, height: i32) -> usize {
        (width.max(0) as usize) * (height.max(0) as usize) * 3
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
