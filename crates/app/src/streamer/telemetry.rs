//! Telemetry helpers for tracing setup, Prometheus metrics, and thread
//! spawning.

use std::{io, net::SocketAddr, sync::OnceLock, thread, time::Duration};

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

static METRICS_INIT: OnceLock<()> = OnceLock::new();

/// Install the global tracing subscriber. Safe to call more than once; later
/// calls are no-ops.
pub(crate) fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_filter(env_filter),
        )
        .try_init();
}

/// Install the global metrics recorder.
///
/// With a listen address the Prometheus exporter serves scrapes itself;
/// without one the recorder is still installed (with its upkeep thread) so
/// every macro in the pipeline stays live.
pub(crate) fn init_metrics(listen: Option<SocketAddr>) {
    METRICS_INIT.get_or_init(|| {
        match listen {
            Some(addr) => {
                if let Err(err) = PrometheusBuilder::new().with_http_listener(addr).install() {
                    tracing::warn!("failed to install Prometheus exporter on {addr}: {err}");
                }
            }
            None => {
                let recorder = PrometheusBuilder::new().build_recorder();
                let handle = recorder.handle();
                if metrics::set_global_recorder(recorder).is_ok() {
                    let _ = spawn_thread("prometheus-upkeep", move || {
                        loop {
                            thread::sleep(Duration::from_secs(5));
                            handle.run_upkeep();
                        }
                    });
                }
            }
        }
    });
}

/// Spawn a named thread that inherits the current tracing dispatcher.
pub(crate) fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}
