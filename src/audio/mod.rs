pub mod backend;
pub mod file;
pub mod probe;

pub use backend::{AudioBackend, AudioBackendConfig, AudioFrame, ChannelBackend, FrameSender};
pub use file::{AudioFile, FileBackend};
pub use probe::{probe_mp3, Mp3Info};
