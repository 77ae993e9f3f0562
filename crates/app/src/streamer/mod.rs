//! Synchronized fan-out pipeline: captured frames are annotated with person
//! detections and distributed to independent UDP consumers in lock-step
//! rounds.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: Orchestrates the capture → detect → route → transmit loop.
//! - `router`: Builds per-stream packets and applies the drop-on-full policy.
//! - `queue`: Bounded stream queues and their timeouts.
//! - `barrier`: Timeout-protected round rendezvous for the workers.
//! - `worker`: Per-stream worker state machine.
//! - `transform`: Drawing, blurring, and JPEG encoding.
//! - `codec`: Binary metadata wire format.
//! - `transport`: Per-worker UDP sockets and debug snapshots.
//! - `watchdog`: Health monitoring for pipeline components.
//! - `telemetry`: Tracing and metrics bootstrap.
//! - `data`: Stream kinds and packet types shared between stages.

/// Re-export pipeline settings so callers can configure runs without reaching
/// into submodules.
pub use config::{CliArgs, SourceKind, StreamConfig};
pub use data::StreamKind;
/// Launch the streaming pipeline with a ready-made configuration.
pub use pipeline::run;

pub mod codec;

mod barrier;
mod config;
mod data;
mod pipeline;
mod queue;
mod router;
mod telemetry;
mod transform;
mod transport;
mod watchdog;
mod worker;
