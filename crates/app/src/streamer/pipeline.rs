//! Pipeline supervisor tying together capture, detection, routing, and the
//! stream workers.
//!
//! The supervisor wires queues and the barrier, keeps watchdog state in
//! sync, and restarts the whole pipeline when a component stalls. The
//! capture+detect+route loop runs on the supervisor thread itself; every
//! stream worker is an independent thread coupled only through its queue and
//! the round barrier.

use std::{
    fs,
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use detect_core::{Detector, DetectorConfig, load_detector};
use tracing::{debug, error, warn};
use video_ingest::{CaptureError, Frame};

use crate::streamer::{
    barrier::RoundBarrier,
    config::{SourceKind, StreamConfig},
    queue::stream_queue,
    router::PacketRouter,
    telemetry,
    transport::{DebugSink, StreamTransport},
    watchdog::{PipelineHealth, WatchdogState, spawn_watchdog},
    worker::{StreamOptions, WorkerContext, spawn_stream_worker},
};

/// Poll interval for the supervisor's frame receive, so shutdown is observed
/// even when the camera stops delivering.
const FRAME_RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Run the streaming pipeline, automatically restarting on recoverable
/// faults.
pub fn run(config: StreamConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    telemetry::init_tracing(config.verbose);
    telemetry::init_metrics(config.metrics_addr);

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler({
            let handler_shutdown = handler_shutdown.clone();
            move || {
                handler_shutdown.store(true, Ordering::SeqCst);
            }
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let mut attempt: u32 = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match run_pipeline_once(config.clone(), shutdown.clone()) {
            Ok(PipelineOutcome::Graceful) => break,
            Ok(PipelineOutcome::Restart(reason)) => {
                attempt = attempt.saturating_add(1);
                warn!("Pipeline restart requested (reason: {reason}), attempt #{attempt}");
                thread::sleep(Duration::from_secs(1));
            }
            Err(err) => {
                error!("Streaming pipeline error: {err:?}");
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                attempt = attempt.saturating_add(1);
                thread::sleep(Duration::from_secs(1));
            }
        }
    }

    Ok(())
}

/// Result of a single pipeline run attempt.
enum PipelineOutcome {
    Graceful,
    Restart(&'static str),
}

fn open_capture(config: &StreamConfig) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let size = (config.width, config.height);
    match config.source_kind {
        SourceKind::Test => Ok(video_ingest::spawn_test_pattern(size, config.framerate)),
        SourceKind::Device => {
            video_ingest::spawn_device_reader(&config.source_uri, size, config.framerate)
                .context("Failed to start device capture")
        }
        SourceKind::Rtsp => video_ingest::spawn_rtsp_reader(&config.source_uri, size)
            .context("Failed to start RTSP capture"),
        SourceKind::Udp => video_ingest::spawn_udp_reader(&config.source_uri, size)
            .context("Failed to start UDP capture"),
    }
}

/// Execute the pipeline once, returning whether to exit or restart.
fn run_pipeline_once(config: StreamConfig, shutdown: Arc<AtomicBool>) -> Result<PipelineOutcome> {
    if shutdown.load(Ordering::SeqCst) {
        return Ok(PipelineOutcome::Graceful);
    }

    let receiver = open_capture(&config)?;

    let mut detector: Box<dyn Detector> = load_detector(&DetectorConfig {
        model_path: config.model_path.clone(),
        input_size: (config.input_size, config.input_size),
        conf_threshold: config.conf_threshold,
    })
    .context("Failed to initialise detector")?;
    debug!("{}", detector.describe());

    let health = Arc::new(PipelineHealth::new(&config.streams));
    let pipeline_running = Arc::new(AtomicBool::new(true));
    let watchdog_state = Arc::new(WatchdogState::new());

    // Party count follows the enabled stream set; the barrier deadlocks
    // otherwise.
    let barrier = Arc::new(RoundBarrier::new(
        config.streams.len(),
        Duration::from_millis(config.barrier_timeout_ms),
    ));
    debug!(
        "Round barrier armed for {} stream worker(s), timeout {} ms",
        barrier.parties(),
        config.barrier_timeout_ms
    );

    if config.debug {
        fs::create_dir_all(&config.debug_dir)
            .with_context(|| format!("Failed to create debug dir {}", config.debug_dir.display()))?;
    }

    let options = StreamOptions {
        jpeg_quality: config.jpeg_quality,
        blur_fraction: config.blur_fraction,
        blur_sigma: config.blur_sigma,
    };

    let mut senders = Vec::with_capacity(config.streams.len());
    let mut worker_handles = Vec::with_capacity(config.streams.len());
    for &kind in &config.streams {
        let (tx, rx) = stream_queue(kind);
        senders.push(tx);

        let transport = StreamTransport::bind(config.endpoint(kind))
            .with_context(|| format!("Failed to open transport for the {} stream", kind.label()))?;
        debug!("{} stream transmitting to {}", kind.label(), transport.target());

        let ctx = WorkerContext {
            kind,
            receiver: rx,
            barrier: barrier.clone(),
            transport,
            debug_sink: config
                .debug
                .then(|| DebugSink::new(&config.debug_dir, kind)),
            options,
            health: health.clone(),
            running: pipeline_running.clone(),
            shutdown: shutdown.clone(),
        };
        worker_handles.push(
            spawn_stream_worker(ctx)
                .with_context(|| format!("Failed to spawn the {} stream worker", kind.label()))?,
        );
    }
    let router = PacketRouter::new(senders);

    let watchdog_handle = spawn_watchdog(
        health.clone(),
        pipeline_running.clone(),
        shutdown.clone(),
        watchdog_state.clone(),
    );

    let mut frame_number: u64 = 0;
    let mut smoothed_fps: f32 = 0.0;
    let mut last_instant = Instant::now();
    let mut dropped_packets: u64 = 0;
    let mut restart_reason: Option<&'static str> = None;

    while pipeline_running.load(Ordering::Relaxed) {
        if shutdown.load(Ordering::Relaxed) {
            pipeline_running.store(false, Ordering::SeqCst);
            break;
        }

        let frame = match receiver.recv_timeout(FRAME_RECV_TIMEOUT) {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => {
                error!("Capture error: {err}");
                restart_reason = Some("capture error");
                pipeline_running.store(false, Ordering::SeqCst);
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                error!("Frame channel closed");
                restart_reason = Some("capture channel closed");
                pipeline_running.store(false, Ordering::SeqCst);
                break;
            }
        };

        health.beat_router();
        frame_number = frame_number.wrapping_add(1);

        let now = Instant::now();
        let elapsed = now.duration_since(last_instant).as_secs_f32();
        last_instant = now;
        if elapsed > 0.0 {
            let instant = 1.0 / elapsed;
            smoothed_fps = if smoothed_fps == 0.0 {
                instant
            } else {
                0.9 * smoothed_fps + 0.1 * instant
            };
        }
        metrics::gauge!("stream_pipeline_fps").set(f64::from(smoothed_fps));

        let detect_start = Instant::now();
        let detections = match detector.detect(&frame.data, frame.width, frame.height) {
            Ok(detections) => detections,
            Err(err) => {
                error!("Detector inference failed: {err:?}");
                restart_reason = Some("detector failure");
                pipeline_running.store(false, Ordering::SeqCst);
                break;
            }
        };
        metrics::histogram!("stream_stage_latency_seconds", "stage" => "detect")
            .record(detect_start.elapsed().as_secs_f64());

        if frame_number % 30 == 0 {
            debug!(
                "Capture heartbeat: frame #{}, {:.1} fps, {} detection(s), ts={}",
                frame_number,
                smoothed_fps,
                detections.len(),
                frame.timestamp_ms
            );
        }

        let route_start = Instant::now();
        let report = router.route(&frame, &detections);
        metrics::histogram!("stream_stage_latency_seconds", "stage" => "route")
            .record(route_start.elapsed().as_secs_f64());
        metrics::counter!("stream_packets_enqueued_total").increment(report.enqueued as u64);

        if report.closed > 0 {
            error!("Stream worker terminated unexpectedly");
            restart_reason = Some("stream queue disconnected");
            pipeline_running.store(false, Ordering::SeqCst);
            break;
        }
        if report.dropped > 0 {
            dropped_packets = dropped_packets.wrapping_add(report.dropped as u64);
            if config.verbose {
                warn!(
                    "Dropped {} packet(s) on frame #{frame_number} (stream backlog, dropped total: {dropped_packets})",
                    report.dropped
                );
            }
        }
    }

    debug!("Stopping streaming pipeline");

    pipeline_running.store(false, Ordering::SeqCst);
    drop(router);
    for handle in worker_handles {
        let _ = handle.join();
    }
    let _ = watchdog_handle.join();

    if watchdog_state.is_triggered() {
        let reason = watchdog_state.reason().unwrap_or("watchdog");
        return Ok(PipelineOutcome::Restart(reason));
    }

    if let Some(reason) = restart_reason {
        return Ok(PipelineOutcome::Restart(reason));
    }

    Ok(PipelineOutcome::Graceful)
}
