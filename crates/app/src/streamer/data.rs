use std::str::FromStr;

use detect_core::{BoundingBox, Detection};
use serde::Serialize;
use video_ingest::Frame;

/// Downstream channels fanned out per detection cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Unmodified frame, JPEG over UDP.
    Raw,
    /// Boxes outlined on the frame; transmits the coordinates JSON message.
    Overlay,
    /// Face regions Gaussian-blurred, JPEG over UDP.
    Blur,
    /// Binary detection metadata, no frame.
    Meta,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::Raw,
        StreamKind::Overlay,
        StreamKind::Blur,
        StreamKind::Meta,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StreamKind::Raw => "raw",
            StreamKind::Overlay => "overlay",
            StreamKind::Blur => "blur",
            StreamKind::Meta => "meta",
        }
    }

    /// Deterministic name of the per-stream "latest" snapshot file.
    pub fn snapshot_name(self) -> &'static str {
        match self {
            StreamKind::Raw => "raw_stream.jpg",
            StreamKind::Overlay => "overlay_stream.jpg",
            StreamKind::Blur => "blur_stream.jpg",
            StreamKind::Meta => "meta_stream.bin",
        }
    }
}

impl FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "raw" => Ok(StreamKind::Raw),
            "overlay" => Ok(StreamKind::Overlay),
            "blur" => Ok(StreamKind::Blur),
            "meta" => Ok(StreamKind::Meta),
            other => Err(format!(
                "unknown stream kind {other:?} (expected raw, overlay, blur, meta)"
            )),
        }
    }
}

/// Unit of work consumed by a stream worker.
///
/// Every variant owns a private copy of whatever frame and box data it
/// carries; packets are enqueued at most once and dequeued exactly once.
pub(crate) enum StreamPacket {
    Raw { frame: Frame },
    Overlay { frame: Frame, detections: Vec<Detection> },
    Blur { frame: Frame, boxes: Vec<BoundingBox> },
    Meta { detections: Vec<Detection> },
}

/// Wire shape of the coordinates datagram sent by the overlay worker.
#[derive(Serialize)]
pub(crate) struct CoordsMessage {
    pub(crate) bboxes: Vec<[i32; 4]>,
}
