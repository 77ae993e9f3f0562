//! Bounded per-stream queues decoupling the router from the stream workers.
//!
//! Backpressure policy: the producer never blocks past a short enqueue
//! timeout; a full queue drops the newest packet for that stream only.
//! Consumers poll with a timeout so they can observe shutdown.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use tracing::debug;

use crate::streamer::data::{StreamKind, StreamPacket};

/// Fixed capacity of every stream queue.
pub(crate) const QUEUE_CAPACITY: usize = 10;
/// Producer-side bounded wait before a packet is dropped.
pub(crate) const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(10);
/// Consumer-side polling interval.
pub(crate) const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Build the queue pair for one stream kind.
pub(crate) fn stream_queue(kind: StreamKind) -> (PacketSender, PacketReceiver) {
    let (tx, rx) = bounded(QUEUE_CAPACITY);
    (PacketSender { kind, tx }, PacketReceiver { kind, rx })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EnqueueOutcome {
    Queued,
    /// Queue stayed full past the timeout; the packet was discarded.
    Dropped,
    /// The consumer is gone.
    Closed,
}

pub(crate) struct PacketSender {
    kind: StreamKind,
    tx: Sender<StreamPacket>,
}

impl PacketSender {
    pub(crate) fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Offer a packet, favoring recency over completeness.
    pub(crate) fn enqueue(&self, packet: StreamPacket) -> EnqueueOutcome {
        match self.tx.send_timeout(packet, ENQUEUE_TIMEOUT) {
            Ok(()) => {
                metrics::gauge!("stream_queue_depth", "stream" => self.kind.label())
                    .set(self.tx.len() as f64);
                EnqueueOutcome::Queued
            }
            Err(SendTimeoutError::Timeout(_)) => {
                metrics::counter!("stream_dropped_packets_total", "stream" => self.kind.label())
                    .increment(1);
                debug!(
                    "Dropping {} packet (queue full at {} entries)",
                    self.kind.label(),
                    QUEUE_CAPACITY
                );
                EnqueueOutcome::Dropped
            }
            Err(SendTimeoutError::Disconnected(_)) => EnqueueOutcome::Closed,
        }
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.tx.len()
    }
}

pub(crate) enum Dequeue {
    Packet(StreamPacket),
    /// Nothing arrived within the polling interval.
    Empty,
    /// The producer is gone and the queue is drained.
    Closed,
}

pub(crate) struct PacketReceiver {
    kind: StreamKind,
    rx: Receiver<StreamPacket>,
}

impl PacketReceiver {
    pub(crate) fn kind(&self) -> StreamKind {
        self.kind
    }

    pub(crate) fn dequeue(&self) -> Dequeue {
        match self.rx.recv_timeout(DEQUEUE_TIMEOUT) {
            Ok(packet) => {
                metrics::gauge!("stream_queue_depth", "stream" => self.kind.label())
                    .set(self.rx.len() as f64);
                Dequeue::Packet(packet)
            }
            Err(RecvTimeoutError::Timeout) => Dequeue::Empty,
            Err(RecvTimeoutError::Disconnected) => Dequeue::Closed,
        }
    }
}
