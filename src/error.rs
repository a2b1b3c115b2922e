//! Error taxonomy for capture sessions and track encoding.

use thiserror::Error;

/// Errors surfaced by the controller, the recorder bridge and the encoder worker
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Unsupported encoder configuration (e.g. channel count other than 2)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Capturable stream unobtainable, or playback is on a remote device
    #[error("device error: {0}")]
    Device(String),

    /// Prepare request explicitly rejected by the content collaborator
    #[error("permission denied: {0}")]
    Permission(String),

    /// Cover art fetch failed (always recovered locally)
    #[error("network error: {0}")]
    Network(String),

    /// Failure inside the buffer -> encode -> tag pipeline
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Persisted tab binding refers to a tab that no longer exists
    #[error("storage inconsistency: {0}")]
    StorageInconsistency(String),

    /// Command issued outside the state that accepts it
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Short machine-readable code, used by the HTTP layer
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::Configuration(_) => "CONFIGURATION_ERROR",
            CaptureError::Device(_) => "DEVICE_ERROR",
            CaptureError::Permission(_) => "PERMISSION_ERROR",
            CaptureError::Network(_) => "NETWORK_ERROR",
            CaptureError::Encoding(_) => "ENCODING_ERROR",
            CaptureError::StorageInconsistency(_) => "STORAGE_INCONSISTENCY",
            CaptureError::InvalidState(_) => "INVALID_STATE",
            CaptureError::Io(_) => "IO_ERROR",
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;
