//! Track encoding pipeline: PCM buffer -> MP3 -> ID3 tags -> artifact.

pub mod artifact;
pub mod cover;
pub mod lame;
pub mod tags;
pub mod worker;

pub use artifact::EncodedArtifact;
pub use cover::{CoverArt, CoverFetcher, HttpCoverFetcher};
pub use lame::{EncoderFactory, FrameEncoder, LameEncoder, LameEncoderFactory};
pub use worker::{
    CompletedTrack, EncoderOptions, TrackEncoderWorker, TrackOutcome, WorkerConfig, WorkerEvent,
    WorkerHandle, WorkerPhase, WorkerSnapshot,
};
