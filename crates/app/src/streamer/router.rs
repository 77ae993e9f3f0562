//! Converts detection results into per-stream packets under backpressure.
//!
//! The router runs on the producer thread. Degenerate boxes never reach a
//! queue; a cycle with zero valid detections has no side effect at all. Each
//! enqueue is independent, so one saturated stream cannot stall the others.

use detect_core::{BoundingBox, Detection};
use tracing::debug;
use video_ingest::Frame;

use crate::streamer::{
    data::{StreamKind, StreamPacket},
    queue::{EnqueueOutcome, PacketSender},
};

/// Per-cycle delivery summary reported back to the supervisor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RouteReport {
    pub(crate) enqueued: usize,
    pub(crate) dropped: usize,
    /// Queues whose worker is gone; non-zero means the pipeline is tearing
    /// down.
    pub(crate) closed: usize,
}

pub(crate) struct PacketRouter {
    senders: Vec<PacketSender>,
}

impl PacketRouter {
    /// One sender per enabled stream kind.
    pub(crate) fn new(senders: Vec<PacketSender>) -> Self {
        Self { senders }
    }

    /// Fan a detection cycle out to every enabled stream.
    pub(crate) fn route(&self, frame: &Frame, detections: &[Detection]) -> RouteReport {
        let mut report = RouteReport::default();

        let valid: Vec<Detection> = detections
            .iter()
            .copied()
            .filter(|d| d.bbox.is_valid())
            .collect();
        if valid.is_empty() {
            return report;
        }

        for sender in &self.senders {
            let packet = build_packet(sender.kind(), frame, &valid);
            match sender.enqueue(packet) {
                EnqueueOutcome::Queued => report.enqueued += 1,
                EnqueueOutcome::Dropped => report.dropped += 1,
                EnqueueOutcome::Closed => {
                    debug!("{} queue disconnected", sender.kind().label());
                    report.closed += 1;
                }
            }
        }

        report
    }
}

fn build_packet(kind: StreamKind, frame: &Frame, valid: &[Detection]) -> StreamPacket {
    match kind {
        StreamKind::Raw => StreamPacket::Raw {
            frame: frame.clone(),
        },
        StreamKind::Overlay => StreamPacket::Overlay {
            frame: frame.clone(),
            detections: valid.to_vec(),
        },
        StreamKind::Blur => StreamPacket::Blur {
            frame: frame.clone(),
            boxes: boxes_of(valid),
        },
        StreamKind::Meta => StreamPacket::Meta {
            detections: valid.to_vec(),
        },
    }
}

fn boxes_of(detections: &[Detection]) -> Vec<BoundingBox> {
    detections.iter().map(|d| d.bbox).collect()
}
