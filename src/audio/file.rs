use anyhow::{bail, Context, Result};
use hound::WavReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            bail!(
                "Unsupported WAV format: {} bit {:?} (expected 16 bit PCM)",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds = samples.len() as f64 /
            (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Split the file into fixed-size interleaved frames
    ///
    /// `frame_size` is in samples per channel; the last frame may be shorter.
    pub fn frames(&self, frame_size: usize) -> Vec<AudioFrame> {
        let chunk_len = frame_size.max(1) * self.channels.max(1) as usize;
        let mut timestamp_ms = 0;

        self.samples
            .chunks(chunk_len)
            .map(|chunk| {
                let frame = AudioFrame::new(chunk.to_vec(), self.sample_rate, self.channels, timestamp_ms);
                timestamp_ms += frame.duration_ms();
                frame
            })
            .collect()
    }
}

/// Backend that replays a WAV file as a live capture stream
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    /// Pace frames at playback speed instead of emitting them as fast as possible
    realtime: bool,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, config: AudioBackendConfig, realtime: bool) -> Self {
        Self {
            path: path.into(),
            config,
            realtime,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }

        let audio = AudioFile::open(&self.path)?;
        if audio.channels != self.config.channels {
            bail!(
                "{} has {} channels, capture expects {}",
                audio.path,
                audio.channels,
                self.config.channels
            );
        }

        let frames = audio.frames(self.config.frame_size);
        let (tx, rx) = mpsc::channel(64);
        let capturing = Arc::clone(&self.capturing);
        let realtime = self.realtime;

        capturing.store(true, Ordering::SeqCst);

        let task = tokio::spawn(async move {
            let total = frames.len();
            for mut frame in frames {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }

                frame.captured_at = Instant::now();

                let pace = Duration::from_millis(frame.duration_ms());
                if tx.send(frame).await.is_err() {
                    debug!("Frame receiver dropped, ending file playback");
                    break;
                }

                if realtime {
                    tokio::time::sleep(pace).await;
                }
            }

            capturing.store(false, Ordering::SeqCst);
            info!("File playback finished ({} frames)", total);
        });

        self.task = Some(task);

        info!("File audio capture started: {}", self.path.display());

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("File playback task failed: {}", e);
                }
            }
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "wav file"
    }
}
