use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{SessionEvent, TabStatus};
use super::ports::{ContentPort, IconState, Notification, Presenter, TabCapture, TabId};
use super::stats::{CaptureState, SessionStats};
use super::store::{SessionState, SessionStore};
use crate::download::{track_filename, Downloader};
use crate::encoder::{
    CompletedTrack, CoverFetcher, EncoderFactory, EncoderOptions, TrackEncoderWorker, TrackOutcome,
    WorkerConfig, WorkerEvent,
};
use crate::error::{CaptureError, CaptureResult};
use crate::recorder::{PendingTrack, RecorderBridge};
use crate::track::Track;

/// Collaborators of a [`CaptureController`]
#[derive(Clone)]
pub struct ControllerPorts {
    pub store: Arc<dyn SessionStore>,
    pub content: Arc<dyn ContentPort>,
    pub tabs: Arc<dyn TabCapture>,
    pub presenter: Arc<dyn Presenter>,
    pub downloader: Arc<dyn Downloader>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub covers: Arc<dyn CoverFetcher>,
}

/// Stream layout and output settings of a capture session
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoder: EncoderOptions,
    /// First path segment of every saved track
    pub download_prefix: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            encoder: EncoderOptions::default(),
            download_prefix: "clipinc".to_string(),
        }
    }
}

/// Everything that lives exactly as long as one Recording session
struct ActiveSession {
    tab_id: TabId,
    bridge: RecorderBridge,
    /// Volume the page is restored to on stop
    volume: f32,
    started_at: DateTime<Utc>,
    /// Stops deliveries and the worker event relay
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Session state machine: Idle -> Preparing -> Recording -> Stopping -> Idle
pub struct CaptureController {
    ports: ControllerPorts,
    config: ControllerConfig,
    state: CaptureState,
    active: Option<ActiveSession>,
}

impl CaptureController {
    pub fn new(ports: ControllerPorts, config: ControllerConfig) -> Self {
        Self {
            ports,
            config,
            state: CaptureState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Tab bound to the running session, if any
    pub fn bound_tab(&self) -> Option<TabId> {
        self.active.as_ref().map(|active| active.tab_id)
    }

    /// Prepare the active tab and start capturing it
    ///
    /// Allowed only from Idle. Any failure leaves the controller Idle with
    /// nothing persisted, so the call can simply be retried.
    pub async fn start_capture(&mut self) -> CaptureResult<()> {
        if self.state != CaptureState::Idle {
            return Err(CaptureError::InvalidState(format!(
                "cannot start capture while {:?}",
                self.state
            )));
        }

        self.state = CaptureState::Preparing;

        match self.prepare().await {
            Ok(active) => {
                info!("Capturing tab {}", active.tab_id);
                self.active = Some(active);
                self.state = CaptureState::Recording;
                Ok(())
            }
            Err(e) => {
                error!("Failed to start capture: {}", e);
                self.state = CaptureState::Idle;

                if matches!(e, CaptureError::Device(_) | CaptureError::Permission(_)) {
                    self.ports.presenter.notify(Notification::Error {
                        message: format!("Change the playback device to this browser ({})", e),
                    });
                }

                Err(e)
            }
        }
    }

    async fn prepare(&self) -> CaptureResult<ActiveSession> {
        let ports = &self.ports;

        let tab_id = ports.tabs.active_tab().await?;
        let response = ports.content.prepare_recording(tab_id).await?;

        if let Some(reason) = response.error {
            return Err(rejection(reason));
        }

        let backend = match ports.tabs.capture(tab_id).await {
            Ok(backend) => backend,
            Err(e) => {
                self.release_page(tab_id, response.volume).await;
                return Err(e);
            }
        };

        let (worker, worker_events) =
            match TrackEncoderWorker::spawn(Arc::clone(&ports.encoders), Arc::clone(&ports.covers)) {
                Ok(spawned) => spawned,
                Err(e) => {
                    self.release_page(tab_id, response.volume).await;
                    return Err(e);
                }
            };

        let worker_config = WorkerConfig {
            num_channels: self.config.channels,
            sample_rate: self.config.sample_rate,
        };

        let bridge = match RecorderBridge::new(backend, worker, worker_config, self.config.encoder.clone()).await {
            Ok(bridge) => bridge,
            Err(e) => {
                self.release_page(tab_id, response.volume).await;
                return Err(e);
            }
        };

        if let Err(e) = self.activate(tab_id, &bridge, response.volume).await {
            bridge.shutdown().await;
            self.release_page(tab_id, response.volume).await;
            return Err(e);
        }

        let token = CancellationToken::new();
        let relay = tokio::spawn(relay_worker_events(
            worker_events,
            Arc::clone(&ports.presenter),
            token.clone(),
        ));

        Ok(ActiveSession {
            tab_id,
            bridge,
            volume: response.volume,
            started_at: Utc::now(),
            token,
            tasks: vec![relay],
        })
    }

    /// Persist the new session, then let the page play
    async fn activate(&self, tab_id: TabId, bridge: &RecorderBridge, volume: f32) -> CaptureResult<()> {
        let ports = &self.ports;

        // Restore the original audio for the user
        bridge.set_volume(volume)?;

        ports
            .store
            .set(SessionState {
                is_recording: true,
                tab_id,
                track: None,
                song_count: 0,
            })
            .await?;

        if let Err(e) = ports.content.start_recording(tab_id).await {
            warn!("Failed to start playback on tab {}: {}", tab_id, e);
        }

        ports.presenter.set_icon(IconState::Recording);

        Ok(())
    }

    /// Give the volume control back after a failed attempt
    async fn release_page(&self, tab_id: TabId, volume: f32) {
        if let Err(e) = self.ports.content.stop_recording(tab_id, volume).await {
            warn!("Failed to release tab {}: {}", tab_id, e);
        }
    }

    /// Stop capturing; a no-op unless Recording
    pub async fn stop_capture(&mut self) -> CaptureResult<()> {
        let Some(active) = self.active.take() else {
            debug!("Stop requested while {:?}, ignoring", self.state);
            return Ok(());
        };

        self.state = CaptureState::Stopping;
        let result = self.teardown(active, true).await;
        self.state = CaptureState::Idle;

        result
    }

    async fn teardown(&self, active: ActiveSession, release_page: bool) -> CaptureResult<()> {
        info!("Stopping capture of tab {}", active.tab_id);

        active.token.cancel();
        for task in &active.tasks {
            task.abort();
        }
        futures::future::join_all(active.tasks).await;

        let _ = active.bridge.cancel_recording();
        active.bridge.shutdown().await;

        if release_page {
            self.release_page(active.tab_id, active.volume).await;
        }

        let result = self.ports.store.reset().await;
        self.ports.presenter.set_icon(IconState::Default);
        self.ports.presenter.notify(Notification::Stopped);

        result
    }

    /// Dispatch one playback-lifecycle or tab event
    pub async fn handle_event(&mut self, event: SessionEvent) -> CaptureResult<()> {
        match event {
            SessionEvent::TabRemoved { tab_id } => return self.on_tab_removed(tab_id).await,
            SessionEvent::WindowRemoved => return self.on_window_removed().await,
            _ => {}
        }

        if self.state != CaptureState::Recording {
            debug!("Ignoring {:?} while {:?}", event, self.state);
            return Ok(());
        }

        match event {
            SessionEvent::Play { track } => {
                if let Some(track) = track {
                    self.remember_track(track).await?;
                }
                self.bridge()?.start_recording()
            }
            SessionEvent::UpdateTrack { track } => self.remember_track(track).await,
            SessionEvent::Ended { track } => self.on_ended(track).await,
            SessionEvent::Abort => self.bridge()?.cancel_recording(),
            SessionEvent::Pause | SessionEvent::StopCapture => self.stop_capture().await,
            SessionEvent::SetVolume { volume } => {
                let active = self.active_mut()?;
                active.volume = volume;
                active.bridge.set_volume(volume)
            }
            SessionEvent::TabUpdated { tab_id, status } => {
                if status == TabStatus::Loading && self.bound_tab() == Some(tab_id) {
                    info!("Tab {} is navigating away", tab_id);
                    self.stop_capture().await
                } else {
                    Ok(())
                }
            }
            SessionEvent::TabRemoved { .. } | SessionEvent::WindowRemoved => Ok(()),
        }
    }

    fn active_mut(&mut self) -> CaptureResult<&mut ActiveSession> {
        self.active
            .as_mut()
            .ok_or_else(|| CaptureError::InvalidState("no capture session".to_string()))
    }

    fn bridge(&self) -> CaptureResult<&RecorderBridge> {
        self.active
            .as_ref()
            .map(|active| &active.bridge)
            .ok_or_else(|| CaptureError::InvalidState("no capture session".to_string()))
    }

    async fn remember_track(&self, track: Track) -> CaptureResult<()> {
        self.ports
            .store
            .update(Box::new(move |state| state.track = Some(track)))
            .await
            .map(|_| ())
    }

    async fn on_ended(&mut self, track: Option<Track>) -> CaptureResult<()> {
        let track = match track {
            Some(track) => {
                self.remember_track(track.clone()).await?;
                Some(track)
            }
            None => self.ports.store.get().await.track,
        };

        let Some(track) = track else {
            warn!("Track ended without metadata, discarding it");
            return self.bridge()?.cancel_recording();
        };

        if track.is_advertisement() {
            debug!("Skipping advertisement");
            return self.bridge()?.cancel_recording();
        }

        let pending = match self.bridge()?.finish_recording(track).await {
            Ok(pending) => pending,
            Err(CaptureError::InvalidState(reason)) => {
                warn!("Track ended before it started: {}", reason);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let ports = self.ports.clone();
        let prefix = self.config.download_prefix.clone();
        let active = self.active_mut()?;
        let token = active.token.clone();

        active.tasks.retain(|task| !task.is_finished());
        active.tasks.push(tokio::spawn(deliver(pending, ports, prefix, token)));

        Ok(())
    }

    async fn on_tab_removed(&mut self, tab_id: TabId) -> CaptureResult<()> {
        let persisted = self.ports.store.get().await.tab_id;
        if (persisted != 0 && persisted == tab_id) || self.bound_tab() == Some(tab_id) {
            warn!("Recorded tab {} was closed", tab_id);
            return self.reset_after_tab_loss().await;
        }
        Ok(())
    }

    async fn on_window_removed(&mut self) -> CaptureResult<()> {
        let persisted = self.ports.store.get().await.tab_id;
        if persisted == 0 || self.ports.tabs.tab_exists(persisted).await {
            return Ok(());
        }

        let inconsistency = CaptureError::StorageInconsistency(format!("tab {} no longer exists", persisted));
        warn!("{}", inconsistency);
        self.reset_after_tab_loss().await
    }

    /// Drop local capture state and reset the store; the tab is gone so it is not notified
    async fn reset_after_tab_loss(&mut self) -> CaptureResult<()> {
        let result = match self.active.take() {
            Some(active) => {
                self.state = CaptureState::Stopping;
                self.teardown(active, false).await
            }
            None => {
                let result = self.ports.store.reset().await;
                self.ports.presenter.set_icon(IconState::Default);
                result
            }
        };

        self.state = CaptureState::Idle;
        result
    }

    pub async fn stats(&self) -> SessionStats {
        let persisted = self.ports.store.get().await;
        let started_at = self.active.as_ref().map(|active| active.started_at);
        let duration_secs = started_at
            .map(|at| Utc::now().signed_duration_since(at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            state: self.state,
            is_recording: persisted.is_recording,
            tab_id: persisted.tab_id,
            started_at,
            duration_secs,
            song_count: persisted.song_count,
            track: persisted.track,
        }
    }

    /// Run the controller as a task owning all session state
    pub fn spawn(self) -> ControllerHandle {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(self.run(rx));
        ControllerHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ControllerCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                ControllerCommand::StartCapture { reply } => {
                    let _ = reply.send(self.start_capture().await);
                }
                ControllerCommand::StopCapture { reply } => {
                    let _ = reply.send(self.stop_capture().await);
                }
                ControllerCommand::Event { event, reply } => {
                    let _ = reply.send(self.handle_event(event).await);
                }
                ControllerCommand::Stats { reply } => {
                    let _ = reply.send(self.stats().await);
                }
            }
        }

        if let Err(e) = self.stop_capture().await {
            error!("Failed to stop capture on shutdown: {}", e);
        }
        info!("Capture controller stopped");
    }
}

/// Prepare refusals naming the playback device are device errors, anything else is a permission error
fn rejection(reason: String) -> CaptureError {
    if reason.to_ascii_lowercase().contains("device") {
        CaptureError::Device(reason)
    } else {
        CaptureError::Permission(reason)
    }
}

async fn relay_worker_events(
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    presenter: Arc<dyn Presenter>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            WorkerEvent::Progress { progress } => presenter.progress(progress),
            WorkerEvent::Error { message } => presenter.notify(Notification::Error { message }),
            WorkerEvent::Complete { track } => debug!("Encoded {} - {}", track.artist, track.title),
        }
    }
}

/// Wait for one finished track and save it
async fn deliver(pending: PendingTrack, ports: ControllerPorts, prefix: String, token: CancellationToken) {
    let outcome = tokio::select! {
        _ = token.cancelled() => return,
        outcome = pending.wait() => outcome,
    };

    let CompletedTrack { track, artifact } = match outcome {
        TrackOutcome::Completed(completed) => completed,
        TrackOutcome::Cancelled => {
            debug!("Track was cancelled before delivery");
            return;
        }
        // Surfaced through the worker's error event
        TrackOutcome::Failed(e) => {
            debug!("Track failed: {}", e);
            return;
        }
    };

    // Session was stopped while the track was being tagged
    if token.is_cancelled() {
        return;
    }

    let filename = track_filename(&prefix, &track);
    if let Err(e) = ports.downloader.save(artifact, &filename).await {
        error!("Failed to save {}: {}", filename.display(), e);
        ports.presenter.notify(Notification::Error {
            message: format!("Failed to save {} - {}: {}", track.artist, track.title, e),
        });
        return;
    }

    let song_count = match ports.store.update(Box::new(|state| state.song_count += 1)).await {
        Ok(state) => state.song_count,
        Err(e) => {
            warn!("Failed to persist song count: {}", e);
            0
        }
    };

    ports.presenter.notify(Notification::Downloaded {
        artist: track.artist,
        title: track.title,
        song_count,
    });
}

enum ControllerCommand {
    StartCapture {
        reply: oneshot::Sender<CaptureResult<()>>,
    },
    StopCapture {
        reply: oneshot::Sender<CaptureResult<()>>,
    },
    Event {
        event: SessionEvent,
        reply: oneshot::Sender<CaptureResult<()>>,
    },
    Stats {
        reply: oneshot::Sender<SessionStats>,
    },
}

/// Cloneable handle to a spawned [`CaptureController`]
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerCommand>,
}

impl ControllerHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ControllerCommand,
    ) -> CaptureResult<T> {
        let (reply, rx) = oneshot::channel();
        let gone = || CaptureError::InvalidState("capture controller has stopped".to_string());

        self.tx.send(command(reply)).await.map_err(|_| gone())?;
        rx.await.map_err(|_| gone())
    }

    pub async fn start_capture(&self) -> CaptureResult<()> {
        self.request(|reply| ControllerCommand::StartCapture { reply }).await?
    }

    pub async fn stop_capture(&self) -> CaptureResult<()> {
        self.request(|reply| ControllerCommand::StopCapture { reply }).await?
    }

    pub async fn send_event(&self, event: SessionEvent) -> CaptureResult<()> {
        self.request(|reply| ControllerCommand::Event { event, reply }).await?
    }

    pub async fn stats(&self) -> CaptureResult<SessionStats> {
        self.request(|reply| ControllerCommand::Stats { reply }).await
    }
}
