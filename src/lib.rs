pub mod audio;
pub mod config;
pub mod download;
pub mod encoder;
pub mod error;
pub mod http;
pub mod recorder;
pub mod session;
pub mod track;

pub use audio::{
    probe_mp3, AudioBackend, AudioBackendConfig, AudioFile, AudioFrame, ChannelBackend, FileBackend, Mp3Info,
};
pub use config::Config;
pub use download::{track_filename, Downloader, FileDownloader};
pub use encoder::{
    CompletedTrack, EncodedArtifact, EncoderOptions, TrackEncoderWorker, TrackOutcome, WorkerConfig, WorkerEvent,
    WorkerHandle,
};
pub use error::{CaptureError, CaptureResult};
pub use http::{create_router, AppState};
pub use recorder::{PendingTrack, RecorderBridge};
pub use session::{CaptureController, ControllerHandle, SessionEvent, SessionStats};
pub use track::{Track, TrackKind};
