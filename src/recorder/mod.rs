//! Recorder bridge between a live capture stream and the track encoder worker.

mod bridge;

pub use bridge::{PendingTrack, RecorderBridge};
