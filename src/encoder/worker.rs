//! Track encoder worker
//!
//! The worker owns the PCM buffer, the encoder and the tag writer for exactly
//! one track at a time. It runs on its own thread and is only reachable
//! through [`WorkerHandle`], which posts [`WorkerCommand`]s into a single
//! inbox. Progress and errors flow back as [`WorkerEvent`]s; each finish gets
//! its own reply channel carrying the [`TrackOutcome`].
//!
//! Lifecycle: `Uninitialized -> Ready -> Accumulating -> Finishing -> Ready`.
//! Cancellation is cooperative: during a finish the inbox is peeked between
//! frames (and while the cover is being fetched), never in the middle of one.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::artifact::EncodedArtifact;
use super::cover::{fetch_best_effort, CoverFetcher};
use super::lame::EncoderFactory;
use super::tags;
use crate::audio::AudioFrame;
use crate::error::{CaptureError, CaptureResult};
use crate::track::Track;

/// The only channel layout the encoder accepts
pub const REQUIRED_CHANNELS: u16 = 2;

/// Stream layout announced by `init`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub num_channels: u16,
    pub sample_rate: u32,
}

/// Encoder options announced by `init`
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderOptions {
    /// Default bitrate when the track does not carry one
    pub kbps: u16,
    /// Upper bound on frames buffered per track; `None` means unbounded
    pub max_buffered_frames: Option<usize>,
    /// Minimum wall-clock time between progress updates
    pub progress_interval: Duration,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            kbps: 256,
            max_buffered_frames: None,
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// A successfully encoded and tagged track
#[derive(Debug)]
pub struct CompletedTrack {
    /// Original metadata with `url` set to the artifact reference
    pub track: Track,
    pub artifact: EncodedArtifact,
}

/// Result of one `finish`
#[derive(Debug)]
pub enum TrackOutcome {
    Completed(CompletedTrack),
    /// Cancelled (or the worker shut down) before the artifact was emitted
    Cancelled,
    Failed(CaptureError),
}

/// Messages posted into the worker's inbox
#[derive(Debug)]
pub enum WorkerCommand {
    Init {
        config: WorkerConfig,
        options: EncoderOptions,
        reply: oneshot::Sender<CaptureResult<()>>,
    },
    Start,
    Record {
        buffer: AudioFrame,
    },
    Finish {
        track: Track,
        reply: oneshot::Sender<TrackOutcome>,
    },
    Cancel,
    Inspect {
        reply: oneshot::Sender<WorkerSnapshot>,
    },
}

/// Notifications emitted by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Error { message: String },
    /// Fraction of the finishing track that has been encoded, in [0, 1]
    Progress { progress: f32 },
    /// Track encoded; `track.url` holds the artifact reference
    Complete { track: Track },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Uninitialized,
    Ready,
    Accumulating,
    Finishing,
}

/// Point-in-time view of the worker, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub phase: WorkerPhase,
    pub buffered_frames: usize,
}

/// Frames of the track currently being accumulated, in arrival order
#[derive(Default)]
struct TrackBuffer {
    frames: VecDeque<AudioFrame>,
    dropped: usize,
}

enum WorkerState {
    Uninitialized,
    Ready,
    Accumulating(TrackBuffer),
    Finishing,
}

impl WorkerState {
    fn phase(&self) -> WorkerPhase {
        match self {
            WorkerState::Uninitialized => WorkerPhase::Uninitialized,
            WorkerState::Ready => WorkerPhase::Ready,
            WorkerState::Accumulating(_) => WorkerPhase::Accumulating,
            WorkerState::Finishing => WorkerPhase::Finishing,
        }
    }
}

/// Handle to a running worker
///
/// Dropping the handle shuts the worker down and discards any in-flight track.
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerCommand>,
    shutdown: CancellationToken,
}

impl WorkerHandle {
    fn post(&self, command: WorkerCommand) -> CaptureResult<()> {
        self.tx
            .send(command)
            .map_err(|_| CaptureError::InvalidState("track encoder worker has stopped".to_string()))
    }

    /// Configure the stream layout; fails unless `num_channels == 2`
    pub async fn init(&self, config: WorkerConfig, options: EncoderOptions) -> CaptureResult<()> {
        let (reply, rx) = oneshot::channel();
        self.post(WorkerCommand::Init { config, options, reply })?;
        rx.await
            .map_err(|_| CaptureError::InvalidState("track encoder worker has stopped".to_string()))?
    }

    pub fn start(&self) -> CaptureResult<()> {
        self.post(WorkerCommand::Start)
    }

    /// Submit one frame; ownership moves into the worker
    pub fn record(&self, buffer: AudioFrame) -> CaptureResult<()> {
        self.post(WorkerCommand::Record { buffer })
    }

    /// Seal the current track; the receiver resolves once it is encoded, cancelled or failed
    pub fn finish(&self, track: Track) -> CaptureResult<oneshot::Receiver<TrackOutcome>> {
        let (reply, rx) = oneshot::channel();
        self.post(WorkerCommand::Finish { track, reply })?;
        Ok(rx)
    }

    pub fn cancel(&self) -> CaptureResult<()> {
        self.post(WorkerCommand::Cancel)
    }

    pub async fn snapshot(&self) -> CaptureResult<WorkerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.post(WorkerCommand::Inspect { reply })?;
        rx.await
            .map_err(|_| CaptureError::InvalidState("track encoder worker has stopped".to_string()))
    }

    /// Stop the worker, releasing buffer and encoder state
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub struct TrackEncoderWorker {
    encoders: Arc<dyn EncoderFactory>,
    covers: Arc<dyn CoverFetcher>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    shutdown: CancellationToken,
    settings: Option<(WorkerConfig, EncoderOptions)>,
    state: WorkerState,
    /// Commands read while peeking for a cancel during a finish
    pending: VecDeque<WorkerCommand>,
}

impl TrackEncoderWorker {
    /// Spawn a worker on a dedicated thread
    pub fn spawn(
        encoders: Arc<dyn EncoderFactory>,
        covers: Arc<dyn CoverFetcher>,
    ) -> CaptureResult<(WorkerHandle, mpsc::UnboundedReceiver<WorkerEvent>)> {
        let (tx, inbox) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let worker = Self {
            encoders,
            covers,
            events,
            shutdown: shutdown.clone(),
            settings: None,
            state: WorkerState::Uninitialized,
            pending: VecDeque::new(),
        };

        std::thread::Builder::new()
            .name("track-encoder".to_string())
            .spawn(move || runtime.block_on(worker.run(inbox)))?;

        Ok((WorkerHandle { tx, shutdown }, events_rx))
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<WorkerCommand>) {
        info!("Track encoder worker started");

        loop {
            let command = match self.pending.pop_front() {
                Some(command) => command,
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        command = inbox.recv() => match command {
                            Some(command) => command,
                            None => break,
                        },
                    }
                }
            };

            self.handle(command, &mut inbox).await;

            if self.shutdown.is_cancelled() {
                break;
            }
        }

        self.state = WorkerState::Uninitialized;
        self.pending.clear();

        info!("Track encoder worker stopped");
    }

    async fn handle(&mut self, command: WorkerCommand, inbox: &mut mpsc::UnboundedReceiver<WorkerCommand>) {
        match command {
            WorkerCommand::Init { config, options, reply } => {
                let result = self.init(config, options);
                let _ = reply.send(result);
            }
            WorkerCommand::Start => self.start(),
            WorkerCommand::Record { buffer } => self.record(buffer),
            WorkerCommand::Finish { track, reply } => {
                let outcome = self.finish(track, inbox).await;
                let _ = reply.send(outcome);
            }
            WorkerCommand::Cancel => self.cancel(),
            WorkerCommand::Inspect { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn emit(&self, event: WorkerEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn report_error(&self, err: &CaptureError) {
        error!("Track encoder: {}", err);
        self.emit(WorkerEvent::Error {
            message: format!("track encoder: {}", err),
        });
    }

    fn snapshot(&self) -> WorkerSnapshot {
        let buffered_frames = match &self.state {
            WorkerState::Accumulating(buffer) => buffer.frames.len(),
            _ => 0,
        };

        WorkerSnapshot {
            phase: self.state.phase(),
            buffered_frames,
        }
    }

    fn init(&mut self, config: WorkerConfig, options: EncoderOptions) -> CaptureResult<()> {
        if config.num_channels != REQUIRED_CHANNELS {
            let err = CaptureError::Configuration(format!(
                "numChannels must be {}, got {}",
                REQUIRED_CHANNELS, config.num_channels
            ));
            self.report_error(&err);
            return Err(err);
        }

        if matches!(self.state, WorkerState::Accumulating(_) | WorkerState::Finishing) {
            let err = CaptureError::InvalidState("cannot re-initialize while a track is open".to_string());
            self.report_error(&err);
            return Err(err);
        }

        info!(
            "Track encoder initialized: {}Hz, {} channels, {} kbps",
            config.sample_rate, config.num_channels, options.kbps
        );

        self.settings = Some((config, options));
        self.state = WorkerState::Ready;
        Ok(())
    }

    fn start(&mut self) {
        match self.state {
            WorkerState::Ready => {
                debug!("Track accumulation started");
                self.state = WorkerState::Accumulating(TrackBuffer::default());
            }
            WorkerState::Uninitialized => {
                self.report_error(&CaptureError::InvalidState("start before init".to_string()));
            }
            WorkerState::Accumulating(_) | WorkerState::Finishing => {
                self.report_error(&CaptureError::InvalidState(
                    "start while a track is already open".to_string(),
                ));
            }
        }
    }

    fn record(&mut self, buffer: AudioFrame) {
        let limit = self.settings.as_ref().and_then(|(_, options)| options.max_buffered_frames);

        match &mut self.state {
            WorkerState::Accumulating(track) => {
                if let Some(limit) = limit {
                    if track.frames.len() >= limit {
                        if track.dropped == 0 {
                            warn!("Track buffer reached {} frames, dropping newer frames", limit);
                        }
                        track.dropped += 1;
                        return;
                    }
                }
                track.frames.push_back(buffer);
            }
            _ => {
                self.report_error(&CaptureError::InvalidState(
                    "frame submitted outside of a track".to_string(),
                ));
            }
        }
    }

    fn cancel(&mut self) {
        match self.state {
            WorkerState::Accumulating(_) => {
                info!("Track cancelled, buffer discarded");
                self.state = WorkerState::Ready;
            }
            WorkerState::Ready => debug!("Cancel with no open track"),
            WorkerState::Uninitialized => {
                self.report_error(&CaptureError::InvalidState("cancel before init".to_string()));
            }
            // Cancels during a finish are consumed by the finish itself
            WorkerState::Finishing => {}
        }
    }

    /// True when a cancel (or shutdown) arrived; other commands are kept for later
    fn cancel_requested(&mut self, inbox: &mut mpsc::UnboundedReceiver<WorkerCommand>) -> bool {
        if self.shutdown.is_cancelled() {
            return true;
        }

        // A cancel queued behind another command belongs to a later track
        while self.pending.is_empty() {
            match inbox.try_recv() {
                Ok(WorkerCommand::Cancel) => return true,
                Ok(WorkerCommand::Inspect { reply }) => {
                    let _ = reply.send(self.snapshot());
                }
                Ok(other) => self.pending.push_back(other),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }

        false
    }

    async fn finish(
        &mut self,
        mut track: Track,
        inbox: &mut mpsc::UnboundedReceiver<WorkerCommand>,
    ) -> TrackOutcome {
        let buffer = match std::mem::replace(&mut self.state, WorkerState::Finishing) {
            WorkerState::Accumulating(buffer) => buffer,
            other => {
                self.state = other;
                let err = CaptureError::InvalidState("finish without an open track".to_string());
                self.report_error(&err);
                return TrackOutcome::Failed(err);
            }
        };

        let outcome = match self.settings.clone() {
            Some((config, options)) => {
                let kbps = track.kbps.unwrap_or(options.kbps);
                match self.encode(buffer, config, kbps, options.progress_interval, inbox) {
                    Ok(Some(payload)) => self.tag(payload, &mut track, inbox).await,
                    Ok(None) => TrackOutcome::Cancelled,
                    Err(e) => TrackOutcome::Failed(e),
                }
            }
            None => TrackOutcome::Failed(CaptureError::InvalidState("finish before init".to_string())),
        };

        self.state = WorkerState::Ready;

        match &outcome {
            TrackOutcome::Completed(done) => info!(
                "Track complete: {} - {} ({} bytes)",
                done.track.artist,
                done.track.title,
                done.artifact.len()
            ),
            TrackOutcome::Cancelled => info!("Track cancelled while finishing"),
            TrackOutcome::Failed(e) => self.report_error(e),
        }

        outcome
    }

    /// Stream buffered frames into a fresh encoder, oldest first
    ///
    /// Returns `Ok(None)` if cancelled. Encoder and buffer are released before returning.
    fn encode(
        &mut self,
        mut buffer: TrackBuffer,
        config: WorkerConfig,
        kbps: u16,
        progress_interval: Duration,
        inbox: &mut mpsc::UnboundedReceiver<WorkerCommand>,
    ) -> CaptureResult<Option<Vec<u8>>> {
        let total = buffer.frames.len();
        if buffer.dropped > 0 {
            warn!("{} frames were dropped from this track at the buffer limit", buffer.dropped);
        }

        info!("Encoding {} frames at {} kbps", total, kbps);
        self.emit(WorkerEvent::Progress { progress: 0.0 });

        let mut encoder = self.encoders.create(config.sample_rate, config.num_channels, kbps)?;

        let mut consumed = 0usize;
        let mut next_report = Instant::now() + progress_interval;

        while let Some(frame) = buffer.frames.pop_front() {
            encoder.encode(&frame)?;
            consumed += 1;

            let now = Instant::now();
            if now >= next_report {
                let progress = (consumed as f32 / total as f32).clamp(0.0, 1.0);
                self.emit(WorkerEvent::Progress { progress });
                next_report = now + progress_interval;
            }

            if self.cancel_requested(inbox) {
                return Ok(None);
            }
        }

        self.emit(WorkerEvent::Progress { progress: 1.0 });

        let payload = encoder.finish()?;
        debug!("Encoder released, {} bytes of audio", payload.len());

        Ok(Some(payload))
    }

    async fn tag(
        &mut self,
        payload: Vec<u8>,
        track: &mut Track,
        inbox: &mut mpsc::UnboundedReceiver<WorkerCommand>,
    ) -> TrackOutcome {
        let covers = Arc::clone(&self.covers);

        let cover = tokio::select! {
            cover = fetch_best_effort(covers.as_ref(), &track.cover_url) => cover,
            _ = wait_for_cancel(&mut self.pending, &self.shutdown, inbox) => {
                return TrackOutcome::Cancelled;
            }
        };

        let bytes = match tags::apply_tags(&payload, track, cover.as_ref()) {
            Ok(bytes) => bytes,
            Err(e) => return TrackOutcome::Failed(e),
        };

        let artifact = EncodedArtifact::new(bytes);
        track.url = Some(artifact.reference());

        self.emit(WorkerEvent::Complete { track: track.clone() });

        TrackOutcome::Completed(CompletedTrack {
            track: track.clone(),
            artifact,
        })
    }
}

/// Resolves when a cancel arrives for the finishing track
async fn wait_for_cancel(
    pending: &mut VecDeque<WorkerCommand>,
    shutdown: &CancellationToken,
    inbox: &mut mpsc::UnboundedReceiver<WorkerCommand>,
) {
    loop {
        if !pending.is_empty() {
            shutdown.cancelled().await;
            return;
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            command = inbox.recv() => match command {
                Some(WorkerCommand::Cancel) | None => return,
                Some(WorkerCommand::Inspect { reply }) => {
                    let _ = reply.send(WorkerSnapshot {
                        phase: WorkerPhase::Finishing,
                        buffered_frames: 0,
                    });
                }
                Some(other) => pending.push_back(other),
            },
        }
    }
}
