use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioBackend, AudioFrame};
use crate::encoder::{EncoderOptions, TrackOutcome, WorkerConfig, WorkerHandle};
use crate::error::{CaptureError, CaptureResult};
use crate::track::Track;

enum BridgeCommand {
    Start,
    Finish {
        track: Track,
        reply: oneshot::Sender<CaptureResult<oneshot::Receiver<TrackOutcome>>>,
    },
    Cancel,
    SetVolume(f32),
    Shutdown,
}

/// Completion of one `finish_recording` call
pub struct PendingTrack {
    rx: oneshot::Receiver<TrackOutcome>,
}

impl PendingTrack {
    /// Wait for the track; a worker that went away counts as cancelled
    pub async fn wait(self) -> TrackOutcome {
        self.rx.await.unwrap_or(TrackOutcome::Cancelled)
    }
}

/// Adapts a live capture stream into per-track frame sequences for the worker
///
/// Control commands and captured frames are handled by one task. A frame is part
/// of a track exactly when it was captured between `start_recording` and the
/// matching `finish_recording`/`cancel_recording`. Frames outside a track are dropped.
pub struct RecorderBridge {
    control: mpsc::UnboundedSender<(Instant, BridgeCommand)>,
    task: Option<JoinHandle<()>>,
}

impl RecorderBridge {
    /// Initialize the worker, start the backend and begin relaying frames
    pub async fn new(
        mut backend: Box<dyn AudioBackend>,
        worker: WorkerHandle,
        config: WorkerConfig,
        options: EncoderOptions,
    ) -> CaptureResult<Self> {
        worker.init(config, options).await?;

        let frames = backend
            .start()
            .await
            .map_err(|e| CaptureError::Device(format!("Failed to start {} capture: {}", backend.name(), e)))?;

        let (control, control_rx) = mpsc::unbounded_channel();

        info!("Recorder bridge started on {} backend", backend.name());

        let task = tokio::spawn(relay(backend, frames, control_rx, worker));

        Ok(Self {
            control,
            task: Some(task),
        })
    }

    fn send(&self, command: BridgeCommand) -> CaptureResult<()> {
        self.control
            .send((Instant::now(), command))
            .map_err(|_| CaptureError::InvalidState("recorder bridge has stopped".to_string()))
    }

    /// Begin accumulating a new track
    pub fn start_recording(&self) -> CaptureResult<()> {
        self.send(BridgeCommand::Start)
    }

    /// Seal the current track and hand it to the worker for encoding
    pub async fn finish_recording(&self, track: Track) -> CaptureResult<PendingTrack> {
        let (reply, rx) = oneshot::channel();
        self.send(BridgeCommand::Finish { track, reply })?;

        let rx = rx
            .await
            .map_err(|_| CaptureError::InvalidState("recorder bridge has stopped".to_string()))??;

        Ok(PendingTrack { rx })
    }

    /// Discard the current track without producing an artifact
    pub fn cancel_recording(&self) -> CaptureResult<()> {
        self.send(BridgeCommand::Cancel)
    }

    /// Change the volume the captured audio is played back at
    pub fn set_volume(&self, volume: f32) -> CaptureResult<()> {
        self.send(BridgeCommand::SetVolume(volume))
    }

    /// Cancel any open track, stop the worker and release the capture stream
    pub async fn shutdown(mut self) {
        let _ = self.control.send((Instant::now(), BridgeCommand::Shutdown));

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Recorder bridge task panicked: {}", e);
            }
        }
    }
}

impl Drop for RecorderBridge {
    fn drop(&mut self) {
        // Unblocks the relay if shutdown() was never awaited
        let _ = self.control.send((Instant::now(), BridgeCommand::Shutdown));
    }
}

/// Frame bookkeeping of the relay task
///
/// Frames are attributed by capture time: a frame belongs to a track when it
/// was captured after the track's start command and before its finish or cancel,
/// whatever order the two channels are read in.
struct Relay {
    worker: WorkerHandle,
    recording: bool,
    stream_open: bool,
    /// Received but not yet attributed, in capture order
    held: VecDeque<AudioFrame>,
    forwarded: usize,
    dropped: usize,
}

impl Relay {
    fn new(worker: WorkerHandle) -> Self {
        Self {
            worker,
            recording: false,
            stream_open: true,
            held: VecDeque::new(),
            forwarded: 0,
            dropped: 0,
        }
    }

    fn accept(&mut self, frame: AudioFrame) {
        if !self.recording {
            self.dropped += 1;
        } else if self.worker.record(frame).is_err() {
            warn!("Worker is gone, frame lost");
        } else {
            self.forwarded += 1;
        }
    }

    fn stream_ended(&mut self) {
        self.stream_open = false;
        info!("Capture stream ended");
    }

    /// Attribute every frame captured before `at` under the current track state
    fn catch_up(&mut self, frames: &mut mpsc::Receiver<AudioFrame>, at: Instant) {
        while self.stream_open {
            match frames.try_recv() {
                Ok(frame) => self.held.push_back(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.stream_ended(),
            }
        }

        while self.held.front().is_some_and(|frame| frame.captured_at < at) {
            if let Some(frame) = self.held.pop_front() {
                self.accept(frame);
            }
        }
    }

    fn flush(&mut self) {
        while let Some(frame) = self.held.pop_front() {
            self.accept(frame);
        }
    }

    fn handle(&mut self, backend: &mut dyn AudioBackend, command: BridgeCommand) {
        match command {
            BridgeCommand::Start => {
                if self.recording {
                    warn!("Track started while another was open, discarding the open track");
                    let _ = self.worker.cancel();
                }
                match self.worker.start() {
                    Ok(()) => {
                        self.recording = true;
                        self.forwarded = 0;
                    }
                    Err(e) => error!("Failed to start track: {}", e),
                }
            }
            BridgeCommand::Finish { track, reply } => {
                let result = if self.recording {
                    self.recording = false;
                    info!(
                        "Finishing track after {} frames: {} - {}",
                        self.forwarded, track.artist, track.title
                    );
                    self.worker.finish(track)
                } else {
                    Err(CaptureError::InvalidState("no track is being recorded".to_string()))
                };
                let _ = reply.send(result);
            }
            BridgeCommand::Cancel => {
                if self.recording {
                    self.recording = false;
                    debug!("Cancelling track after {} frames", self.forwarded);
                    let _ = self.worker.cancel();
                }
            }
            BridgeCommand::SetVolume(volume) => backend.set_monitor_volume(volume),
            BridgeCommand::Shutdown => {}
        }
    }
}

async fn relay(
    mut backend: Box<dyn AudioBackend>,
    mut frames: mpsc::Receiver<AudioFrame>,
    mut control: mpsc::UnboundedReceiver<(Instant, BridgeCommand)>,
    worker: WorkerHandle,
) {
    let mut relay = Relay::new(worker);

    loop {
        tokio::select! {
            biased;

            command = control.recv() => match command {
                None | Some((_, BridgeCommand::Shutdown)) => break,
                Some((at, command)) => {
                    relay.catch_up(&mut frames, at);
                    relay.handle(backend.as_mut(), command);
                }
            },

            frame = frames.recv(), if relay.stream_open => match frame {
                Some(frame) => {
                    relay.held.push_back(frame);
                    relay.flush();
                }
                None => relay.stream_ended(),
            },
        }
    }

    if relay.recording {
        let _ = relay.worker.cancel();
    }
    relay.worker.shutdown();
    let dropped = relay.dropped + relay.held.len();
    drop(relay);

    if let Err(e) = backend.stop().await {
        error!("Failed to stop {} capture: {}", backend.name(), e);
    }

    info!("Recorder bridge stopped ({} frames outside any track dropped)", dropped);
}
