//! Health monitoring for the pipeline supervisor and stream workers.
//!
//! Every stage beats on each loop iteration; the watchdog thread polls the
//! beats and arms a restart when any stage goes stale past the threshold.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::error;

use crate::streamer::data::StreamKind;

pub(crate) const WATCHDOG_POLL_INTERVAL_MS: u64 = 500;
pub(crate) const WATCHDOG_STALE_THRESHOLD_MS: u64 = 1_500;
pub(crate) const WATCHDOG_STARTUP_GRACE_MS: u64 = 5_000;

/// Heartbeat registry for the producer and every enabled stream worker.
pub(crate) struct PipelineHealth {
    router: AtomicU64,
    streams: Vec<(StreamKind, AtomicU64)>,
}

impl PipelineHealth {
    pub(crate) fn new(streams: &[StreamKind]) -> Self {
        let now = current_millis();
        let grace_deadline = now.saturating_add(WATCHDOG_STARTUP_GRACE_MS);
        Self {
            router: AtomicU64::new(grace_deadline),
            streams: streams
                .iter()
                .map(|&kind| (kind, AtomicU64::new(grace_deadline)))
                .collect(),
        }
    }

    pub(crate) fn beat_router(&self) {
        self.router.store(current_millis(), Ordering::Relaxed);
    }

    pub(crate) fn beat_stream(&self, kind: StreamKind) {
        if let Some((_, beat)) = self.streams.iter().find(|(k, _)| *k == kind) {
            beat.store(current_millis(), Ordering::Relaxed);
        }
    }

    pub(crate) fn stale_component(&self, now: u64) -> Option<&'static str> {
        if now.saturating_sub(self.router.load(Ordering::Relaxed)) > WATCHDOG_STALE_THRESHOLD_MS {
            return Some("router");
        }
        for (kind, beat) in &self.streams {
            if now.saturating_sub(beat.load(Ordering::Relaxed)) > WATCHDOG_STALE_THRESHOLD_MS {
                return Some(kind.label());
            }
        }
        None
    }
}

/// Latched restart request raised by the watchdog thread.
pub(crate) struct WatchdogState {
    triggered: AtomicBool,
    reason: Mutex<Option<&'static str>>,
}

impl WatchdogState {
    pub(crate) fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    pub(crate) fn arm(&self, component: &'static str) {
        if let Ok(mut guard) = self.reason.lock() {
            *guard = Some(component);
        }
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub(crate) fn reason(&self) -> Option<&'static str> {
        match self.reason.lock() {
            Ok(guard) => *guard,
            Err(_) => None,
        }
    }
}

pub(crate) fn spawn_watchdog(
    health: Arc<PipelineHealth>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    state: Arc<WatchdogState>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("stream-watchdog".into())
        .spawn(move || {
            while running.load(Ordering::Relaxed) && !shutdown.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(WATCHDOG_POLL_INTERVAL_MS));
                let now = current_millis();
                if let Some(component) = health.stale_component(now) {
                    error!(
                        "Watchdog detected stalled {component} stage; requesting pipeline restart"
                    );
                    state.arm(component);
                    running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        })
        .expect("failed to spawn watchdog thread")
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
