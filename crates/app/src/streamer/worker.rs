//! Stream worker threads.
//!
//! Each worker cycles through: dequeue (bounded) → transform → barrier
//! rendezvous → encode → transmit → optional snapshot. A worker that times
//! out on its queue skips the barrier entirely for that round; any error
//! after the rendezvous costs only the packet in hand, never the pipeline.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Instant,
};

use anyhow::Result;
use detect_core::Detection;
use image::RgbImage;
use tracing::{error, warn};

use crate::streamer::{
    barrier::RoundBarrier,
    codec::encode_metadata,
    data::{CoordsMessage, StreamKind, StreamPacket},
    queue::{Dequeue, PacketReceiver},
    telemetry,
    transform::{annotate_overlay, blur_regions, encode_jpeg, frame_to_rgb},
    transport::{DebugSink, StreamTransport},
    watchdog::PipelineHealth,
};

/// Transform and encoder tuning shared by every stream worker.
#[derive(Clone, Copy, Debug)]
pub(crate) struct StreamOptions {
    pub(crate) jpeg_quality: u8,
    pub(crate) blur_fraction: f32,
    pub(crate) blur_sigma: f32,
}

/// Everything a worker owns; built once by the supervisor, moved into the
/// thread, never shared.
pub(crate) struct WorkerContext {
    pub(crate) kind: StreamKind,
    pub(crate) receiver: PacketReceiver,
    pub(crate) barrier: Arc<RoundBarrier>,
    pub(crate) transport: StreamTransport,
    pub(crate) debug_sink: Option<DebugSink>,
    pub(crate) options: StreamOptions,
    pub(crate) health: Arc<PipelineHealth>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) shutdown: Arc<AtomicBool>,
}

/// Locally transformed packet, ready for the rendezvous.
enum Staged {
    /// Raw or blurred frame awaiting JPEG encoding.
    Image(RgbImage),
    /// Annotated frame plus the coordinates that go on the wire.
    Overlay {
        image: RgbImage,
        detections: Vec<Detection>,
    },
    Meta(Vec<Detection>),
}

/// Encoded payloads for one round.
struct EncodedRound {
    datagram: Vec<u8>,
    snapshot: Option<Vec<u8>>,
}

/// Spawn the worker thread for one stream kind.
pub(crate) fn spawn_stream_worker(ctx: WorkerContext) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread(format!("stream-{}", ctx.kind.label()), move || {
        worker_loop(ctx)
    })
}

fn worker_loop(ctx: WorkerContext) {
    let label = ctx.kind.label();

    while ctx.running.load(Ordering::Relaxed) && !ctx.shutdown.load(Ordering::Relaxed) {
        ctx.health.beat_stream(ctx.kind);

        let packet = match ctx.receiver.dequeue() {
            Dequeue::Packet(packet) => packet,
            Dequeue::Empty => continue,
            Dequeue::Closed => break,
        };

        let round_start = Instant::now();
        let staged = match stage(packet, &ctx.options) {
            Ok(staged) => staged,
            Err(err) => {
                error!("{label} stream transform failed: {err:#}");
                metrics::counter!("stream_faults_total", "stream" => label).increment(1);
                continue;
            }
        };

        if let Err(err) = ctx.barrier.wait() {
            warn!("{label} stream skipping round: {err}");
            metrics::counter!("stream_barrier_timeouts_total", "stream" => label).increment(1);
            continue;
        }

        let encoded = match encode(staged, &ctx.options, ctx.debug_sink.is_some()) {
            Ok(encoded) => encoded,
            Err(err) => {
                error!("{label} stream encode failed: {err:#}");
                metrics::counter!("stream_faults_total", "stream" => label).increment(1);
                continue;
            }
        };

        match ctx.transport.send(&encoded.datagram) {
            Ok(()) => {
                metrics::counter!("stream_rounds_total", "stream" => label).increment(1);
            }
            Err(err) => {
                error!("{label} stream send failed: {err}");
                metrics::counter!("stream_transport_errors_total", "stream" => label)
                    .increment(1);
            }
        }

        if let (Some(sink), Some(snapshot)) = (&ctx.debug_sink, encoded.snapshot.as_deref()) {
            if let Err(err) = sink.write(snapshot) {
                error!("{label} stream snapshot write failed: {err}");
            }
        }

        metrics::histogram!("stream_round_seconds", "stream" => label)
            .record(round_start.elapsed().as_secs_f64());
    }
}

/// Pre-barrier, stream-specific pure transform.
fn stage(packet: StreamPacket, options: &StreamOptions) -> Result<Staged> {
    match packet {
        StreamPacket::Raw { frame } => Ok(Staged::Image(frame_to_rgb(&frame)?)),
        StreamPacket::Overlay { frame, detections } => {
            let mut image = frame_to_rgb(&frame)?;
            annotate_overlay(&mut image, &detections);
            Ok(Staged::Overlay { image, detections })
        }
        StreamPacket::Blur { frame, boxes } => {
            let mut image = frame_to_rgb(&frame)?;
            blur_regions(&mut image, &boxes, options.blur_fraction, options.blur_sigma);
            Ok(Staged::Image(image))
        }
        StreamPacket::Meta { detections } => Ok(Staged::Meta(detections)),
    }
}

/// Post-barrier payload serialization.
fn encode(staged: Staged, options: &StreamOptions, want_snapshot: bool) -> Result<EncodedRound> {
    match staged {
        Staged::Image(image) => {
            let jpeg = encode_jpeg(&image, options.jpeg_quality)?;
            Ok(EncodedRound {
                snapshot: want_snapshot.then(|| jpeg.clone()),
                datagram: jpeg,
            })
        }
        Staged::Overlay { image, detections } => {
            let message = CoordsMessage {
                bboxes: detections
                    .iter()
                    .map(|d| [d.bbox.x1, d.bbox.y1, d.bbox.x2, d.bbox.y2])
                    .collect(),
            };
            let datagram = serde_json::to_vec(&message)?;
            let snapshot = if want_snapshot {
                Some(encode_jpeg(&image, options.jpeg_quality)?)
            } else {
                None
            };
            Ok(EncodedRound { datagram, snapshot })
        }
        Staged::Meta(detections) => {
            let bytes = encode_metadata(&detections)?;
            Ok(EncodedRound {
                snapshot: want_snapshot.then(|| bytes.clone()),
                datagram: bytes,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{net::UdpSocket, time::Duration};

    use detect_core::BoundingBox;
    use video_ingest::{Frame, FrameFormat};

    use crate::streamer::{barrier::SyncError, queue::stream_queue};

    const OPTIONS: StreamOptions = StreamOptions {
        jpeg_quality: 50,
        blur_fraction: 0.4,
        blur_sigma: 3.0,
    };

    fn frame(width: i32, height: i32) -> Frame {
        Frame {
            data: vec![7u8; Frame::byte_len(width, height)],
            width,
            height,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        }
    }

    fn det(score: f32, x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection {
            score,
            bbox: BoundingBox::new(x1, y1, x2, y2),
        }
    }

    fn loopback() -> (UdpSocket, std::net::SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind receiver");
        socket
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("set timeout");
        let addr = socket.local_addr().expect("local addr");
        (socket, addr)
    }

    fn context(
        kind: StreamKind,
        receiver: PacketReceiver,
        barrier: Arc<RoundBarrier>,
        target: std::net::SocketAddr,
    ) -> WorkerContext {
        WorkerContext {
            kind,
            receiver,
            barrier,
            transport: StreamTransport::bind(target).expect("bind transport"),
            debug_sink: None,
            options: OPTIONS,
            health: Arc::new(PipelineHealth::new(&[kind])),
            running: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn test_overlay_encode_produces_coords_json() {
        let staged = Staged::Overlay {
            image: RgbImage::new(4, 4),
            detections: vec![det(0.9, 1, 2, 3, 4), det(0.4, 5, 6, 7, 8)],
        };
        let encoded = encode(staged, &OPTIONS, false).expect("encode failed");
        assert_eq!(
            String::from_utf8(encoded.datagram).expect("not utf-8"),
            r#"{"bboxes":[[1,2,3,4],[5,6,7,8]]}"#
        );
        assert!(encoded.snapshot.is_none());
    }

    #[test]
    fn test_meta_encode_matches_codec() {
        let detections = vec![det(1.0, 1, 2, 3, 4)];
        let staged = Staged::Meta(detections.clone());
        let encoded = encode(staged, &OPTIONS, true).expect("encode failed");
        assert_eq!(encoded.datagram, encode_metadata(&detections).unwrap());
        assert_eq!(encoded.snapshot.as_deref(), Some(&encoded.datagram[..]));
    }

    #[test]
    fn test_two_workers_transmit_one_round_in_lockstep() {
        let barrier = Arc::new(RoundBarrier::new(2, Duration::from_secs(10)));
        let (raw_rx_socket, raw_addr) = loopback();
        let (meta_rx_socket, meta_addr) = loopback();

        let (raw_tx, raw_rx) = stream_queue(StreamKind::Raw);
        let (meta_tx, meta_rx) = stream_queue(StreamKind::Meta);

        let raw_ctx = context(StreamKind::Raw, raw_rx, barrier.clone(), raw_addr);
        let meta_ctx = context(StreamKind::Meta, meta_rx, barrier.clone(), meta_addr);
        let running = raw_ctx.running.clone();
        let meta_running = meta_ctx.running.clone();

        let raw_handle = spawn_stream_worker(raw_ctx).expect("spawn raw worker");
        let meta_handle = spawn_stream_worker(meta_ctx).expect("spawn meta worker");

        raw_tx.enqueue(StreamPacket::Raw { frame: frame(8, 8) });
        meta_tx.enqueue(StreamPacket::Meta {
            detections: vec![det(0.5, 1, 1, 4, 4)],
        });

        let mut buf = [0u8; 2048];
        let (len, _) = raw_rx_socket.recv_from(&mut buf).expect("no raw datagram");
        assert_eq!(&buf[..2], &[0xFF, 0xD8], "raw stream should send JPEG");
        assert!(len > 2);

        let (len, _) = meta_rx_socket
            .recv_from(&mut buf)
            .expect("no meta datagram");
        assert_eq!(&buf[..len], &encode_metadata(&[det(0.5, 1, 1, 4, 4)]).unwrap()[..]);

        running.store(false, Ordering::SeqCst);
        meta_running.store(false, Ordering::SeqCst);
        drop(raw_tx);
        drop(meta_tx);
        raw_handle.join().expect("raw worker panicked");
        meta_handle.join().expect("meta worker panicked");
    }

    #[test]
    fn test_idle_worker_stays_out_of_the_barrier() {
        let barrier = Arc::new(RoundBarrier::new(2, Duration::from_millis(200)));
        let (_socket, addr) = loopback();
        let (tx, rx) = stream_queue(StreamKind::Raw);

        let ctx = context(StreamKind::Raw, rx, barrier.clone(), addr);
        let running = ctx.running.clone();
        let handle = spawn_stream_worker(ctx).expect("spawn worker");

        // The worker has no packet, so this lone rendezvous must time out.
        assert!(matches!(
            barrier.wait(),
            Err(SyncError::RoundTimeout { arrived: 1, .. })
        ));

        running.store(false, Ordering::SeqCst);
        drop(tx);
        handle.join().expect("worker panicked");
    }

    #[test]
    fn test_worker_survives_transport_errors() {
        // Port 0 is never a valid datagram destination, so every send fails.
        let barrier = Arc::new(RoundBarrier::new(1, Duration::from_secs(1)));
        let (tx, rx) = stream_queue(StreamKind::Meta);
        let target: std::net::SocketAddr = "127.0.0.1:0".parse().expect("addr");

        let ctx = context(StreamKind::Meta, rx, barrier, target);
        let running = ctx.running.clone();
        let handle = spawn_stream_worker(ctx).expect("spawn worker");

        for _ in 0..3 {
            tx.enqueue(StreamPacket::Meta {
                detections: vec![det(0.9, 0, 0, 2, 2)],
            });
        }
        std::thread::sleep(Duration::from_millis(300));

        assert!(!handle.is_finished(), "worker died on a transport error");
        running.store(false, Ordering::SeqCst);
        drop(tx);
        handle.join().expect("worker panicked");
    }

    #[test]
    fn test_snapshot_written_after_round() {
        let dir = tempfile::tempdir().expect("tempdir");
        let barrier = Arc::new(RoundBarrier::new(1, Duration::from_secs(1)));
        let (socket, addr) = loopback();
        let (tx, rx) = stream_queue(StreamKind::Blur);

        let mut ctx = context(StreamKind::Blur, rx, barrier, addr);
        ctx.debug_sink = Some(DebugSink::new(dir.path(), StreamKind::Blur));
        let running = ctx.running.clone();
        let handle = spawn_stream_worker(ctx).expect("spawn worker");

        tx.enqueue(StreamPacket::Blur {
            frame: frame(16, 16),
            boxes: vec![BoundingBox::new(2, 2, 10, 12)],
        });

        let mut buf = [0u8; 4096];
        let (len, _) = socket.recv_from(&mut buf).expect("no blur datagram");

        let snapshot_path = dir.path().join("blur_stream.jpg");
        // The snapshot lands after the send; give the worker a moment.
        let mut written = Vec::new();
        for _ in 0..50 {
            if let Ok(bytes) = std::fs::read(&snapshot_path) {
                written = bytes;
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(written, &buf[..len]);

        running.store(false, Ordering::SeqCst);
        drop(tx);
        handle.join().expect("worker panicked");
    }
}
