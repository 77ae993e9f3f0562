//! Synchronized person-detection fan-out streamer.
//!
//! Captured frames are annotated with detections from an external inference
//! engine and distributed to independent UDP consumers in lock-step rounds.
//! The [`streamer`] module holds the whole pipeline; the metadata wire codec
//! is exposed for receiver-side use.

pub mod streamer;
