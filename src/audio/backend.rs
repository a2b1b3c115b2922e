use anyhow::{bail, Result};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// When the frame left the capture source
    pub captured_at: Instant,
}

impl AudioFrame {
    /// Frame captured now
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16, timestamp_ms: u64) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            timestamp_ms,
            captured_at: Instant::now(),
        }
    }

    /// Number of sample frames (samples per channel)
    pub fn frame_len(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Duration of this frame in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frame_len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Sample rate the capture runs at
    pub sample_rate: u32,
    /// Channel count (the encoder only accepts stereo)
    pub channels: u16,
    /// Samples per channel in each emitted frame
    pub frame_size: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            frame_size: 1024,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - File: stream a WAV file as if it were a live tab (`FileBackend`)
/// - Channel: frames pushed by another producer (`ChannelBackend`)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames in playback order
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the underlying stream
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;

    /// Volume at which captured audio is played back to the user
    fn set_monitor_volume(&mut self, _volume: f32) {}
}

/// Producer side of a [`ChannelBackend`]
pub type FrameSender = mpsc::Sender<AudioFrame>;

/// Backend whose frames are pushed through a channel by someone else
pub struct ChannelBackend {
    rx: Option<mpsc::Receiver<AudioFrame>>,
    capturing: bool,
    monitor_volume: f32,
}

impl ChannelBackend {
    pub fn new(buffer: usize) -> (Self, FrameSender) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                rx: Some(rx),
                capturing: false,
                monitor_volume: 1.0,
            },
            tx,
        )
    }

    pub fn monitor_volume(&self) -> f32 {
        self.monitor_volume
    }
}

#[async_trait::async_trait]
impl AudioBackend for ChannelBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing {
            bail!("Already capturing");
        }

        let Some(rx) = self.rx.take() else {
            bail!("Channel backend can only be started once");
        };

        self.capturing = true;
        info!("Channel audio capture started");

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "channel"
    }

    fn set_monitor_volume(&mut self, volume: f32) {
        self.monitor_volume = volume;
    }
}
