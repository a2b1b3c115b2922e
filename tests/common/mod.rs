// Test doubles shared by the integration tests
//
// Each test binary only uses some of these.
#![allow(dead_code)]

use clipinc::audio::{AudioBackend, AudioFrame, ChannelBackend, FrameSender};
use clipinc::download::Downloader;
use clipinc::encoder::{CoverArt, CoverFetcher, EncodedArtifact, EncoderFactory, FrameEncoder};
use clipinc::error::{CaptureError, CaptureResult};
use clipinc::session::{
    ContentPort, IconState, Notification, Presenter, PrepareResponse, SessionState, SessionStore, StateUpdate,
    TabCapture, TabId,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Interleaved stereo frame of `len` samples per channel, stamped with `timestamp_ms`
pub fn stereo_frame(timestamp_ms: u64, len: usize) -> AudioFrame {
    AudioFrame::new(
        (0..len * 2).map(|i| ((i % 200) as i16 - 100) * 50).collect(),
        44100,
        2,
        timestamp_ms,
    )
}

// ============================================================================
// Encoder / cover fakes
// ============================================================================

/// What one fake encoder saw
#[derive(Debug, Clone, Default)]
pub struct EncoderRun {
    pub sample_rate: u32,
    pub channels: u16,
    pub kbps: u16,
    /// Timestamps of the encoded frames, in encode order
    pub frames: Vec<u64>,
    pub finished: bool,
}

/// Factory whose encoders record every frame instead of compressing it
#[derive(Clone, Default)]
pub struct RecordingEncoderFactory {
    pub runs: Arc<Mutex<Vec<EncoderRun>>>,
    /// Simulated work per frame
    pub frame_delay: Duration,
}

impl RecordingEncoderFactory {
    pub fn slow(frame_delay: Duration) -> Self {
        Self {
            frame_delay,
            ..Self::default()
        }
    }

    pub fn runs(&self) -> Vec<EncoderRun> {
        self.runs.lock().unwrap().clone()
    }
}

struct RecordingEncoder {
    runs: Arc<Mutex<Vec<EncoderRun>>>,
    index: usize,
    frame_delay: Duration,
}

impl EncoderFactory for RecordingEncoderFactory {
    fn create(&self, sample_rate: u32, channels: u16, kbps: u16) -> CaptureResult<Box<dyn FrameEncoder>> {
        let mut runs = self.runs.lock().unwrap();
        runs.push(EncoderRun {
            sample_rate,
            channels,
            kbps,
            ..EncoderRun::default()
        });

        Ok(Box::new(RecordingEncoder {
            runs: Arc::clone(&self.runs),
            index: runs.len() - 1,
            frame_delay: self.frame_delay,
        }))
    }
}

impl FrameEncoder for RecordingEncoder {
    fn encode(&mut self, frame: &AudioFrame) -> CaptureResult<()> {
        if !self.frame_delay.is_zero() {
            std::thread::sleep(self.frame_delay);
        }
        self.runs.lock().unwrap()[self.index].frames.push(frame.timestamp_ms);
        Ok(())
    }

    fn finish(self: Box<Self>) -> CaptureResult<Vec<u8>> {
        let mut runs = self.runs.lock().unwrap();
        runs[self.index].finished = true;
        Ok(vec![0xFF; runs[self.index].frames.len() + 1])
    }
}

/// Factory whose encoders fail on the first frame
pub struct FailingEncoderFactory;

struct FailingEncoder;

impl EncoderFactory for FailingEncoderFactory {
    fn create(&self, _sample_rate: u32, _channels: u16, _kbps: u16) -> CaptureResult<Box<dyn FrameEncoder>> {
        Ok(Box::new(FailingEncoder))
    }
}

impl FrameEncoder for FailingEncoder {
    fn encode(&mut self, _frame: &AudioFrame) -> CaptureResult<()> {
        Err(CaptureError::Encoding("encoder exploded".to_string()))
    }

    fn finish(self: Box<Self>) -> CaptureResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Cover source with a fixed answer
pub enum FakeCover {
    Image(CoverArt),
    Unreachable,
    /// Never answers
    Hanging,
}

impl FakeCover {
    pub fn png() -> Self {
        FakeCover::Image(CoverArt {
            data: vec![0x89, b'P', b'N', b'G', 1, 2, 3],
            mime_type: "image/png".to_string(),
        })
    }
}

#[async_trait::async_trait]
impl CoverFetcher for FakeCover {
    async fn fetch(&self, url: &str) -> CaptureResult<CoverArt> {
        if url.is_empty() {
            return Err(CaptureError::Network("Track has no cover URL".to_string()));
        }

        match self {
            FakeCover::Image(cover) => Ok(cover.clone()),
            FakeCover::Unreachable => Err(CaptureError::Network("connection refused".to_string())),
            FakeCover::Hanging => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(CaptureError::Network("timed out".to_string()))
            }
        }
    }
}

// ============================================================================
// Session collaborator fakes
// ============================================================================

/// Memory store that counts resets
#[derive(Default)]
pub struct CountingStore {
    state: Mutex<SessionState>,
    pub resets: AtomicUsize,
    /// Make every `set` fail with an I/O error
    pub reject_writes: AtomicBool,
}

impl CountingStore {
    pub fn read_only() -> Self {
        Self {
            reject_writes: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SessionStore for CountingStore {
    async fn get(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }

    async fn set(&self, state: SessionState) -> CaptureResult<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "store is read-only").into());
        }
        *self.state.lock().unwrap() = state;
        Ok(())
    }

    async fn update(&self, apply: StateUpdate) -> CaptureResult<SessionState> {
        let mut state = self.state.lock().unwrap();
        apply(&mut state);
        Ok(state.clone())
    }

    async fn reset(&self) -> CaptureResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.set(SessionState::default()).await
    }
}

/// Content port that answers prepare requests from a script and records every call
#[derive(Default)]
pub struct ScriptedContent {
    /// Answers for successive prepare requests; defaults to volume 0.8 once exhausted
    pub answers: Mutex<VecDeque<PrepareResponse>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedContent {
    pub fn rejecting_once(reason: &str) -> Self {
        let content = Self::default();
        content.answers.lock().unwrap().push_back(PrepareResponse {
            volume: 0.8,
            error: Some(reason.to_string()),
        });
        content
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ContentPort for ScriptedContent {
    async fn prepare_recording(&self, tab: TabId) -> CaptureResult<PrepareResponse> {
        self.calls.lock().unwrap().push(format!("prepareRecording:{}", tab));
        let answer = self.answers.lock().unwrap().pop_front();
        Ok(answer.unwrap_or(PrepareResponse {
            volume: 0.8,
            error: None,
        }))
    }

    async fn start_recording(&self, tab: TabId) -> CaptureResult<()> {
        self.calls.lock().unwrap().push(format!("startRecording:{}", tab));
        Ok(())
    }

    async fn stop_recording(&self, tab: TabId, volume: f32) -> CaptureResult<()> {
        self.calls.lock().unwrap().push(format!("stopRecording:{}:{}", tab, volume));
        Ok(())
    }
}

/// Tab capture whose streams are fed by the test
pub struct ChannelTabs {
    pub tab: TabId,
    pub open: Mutex<bool>,
    /// Producer side of the most recent capture
    pub sender: Mutex<Option<FrameSender>>,
}

impl ChannelTabs {
    pub fn new(tab: TabId) -> Self {
        Self {
            tab,
            open: Mutex::new(true),
            sender: Mutex::new(None),
        }
    }

    pub fn close(&self) {
        *self.open.lock().unwrap() = false;
    }

    pub fn sender(&self) -> FrameSender {
        self.sender.lock().unwrap().clone().expect("tab is not being captured")
    }
}

#[async_trait::async_trait]
impl TabCapture for ChannelTabs {
    async fn active_tab(&self) -> CaptureResult<TabId> {
        Ok(self.tab)
    }

    async fn capture(&self, tab: TabId) -> CaptureResult<Box<dyn AudioBackend>> {
        if tab != self.tab || !*self.open.lock().unwrap() {
            return Err(CaptureError::Device("No stream found".to_string()));
        }

        let (backend, sender) = ChannelBackend::new(256);
        *self.sender.lock().unwrap() = Some(sender);
        Ok(Box::new(backend))
    }

    async fn tab_exists(&self, tab: TabId) -> bool {
        tab == self.tab && *self.open.lock().unwrap()
    }
}

/// Presenter that keeps everything it is shown
#[derive(Default)]
pub struct RecordingPresenter {
    pub icons: Mutex<Vec<IconState>>,
    pub notifications: Mutex<Vec<Notification>>,
}

impl RecordingPresenter {
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn last_icon(&self) -> Option<IconState> {
        self.icons.lock().unwrap().last().copied()
    }
}

impl Presenter for RecordingPresenter {
    fn set_icon(&self, icon: IconState) {
        self.icons.lock().unwrap().push(icon);
    }

    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// Downloader that keeps artifacts in memory
#[derive(Default)]
pub struct MemoryDownloader {
    pub saved: Mutex<Vec<(PathBuf, Vec<u8>)>>,
}

impl MemoryDownloader {
    pub fn saved(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Downloader for MemoryDownloader {
    async fn save(&self, artifact: EncodedArtifact, filename: &Path) -> CaptureResult<PathBuf> {
        self.saved
            .lock()
            .unwrap()
            .push((filename.to_path_buf(), artifact.into_bytes()));
        Ok(filename.to_path_buf())
    }
}

/// Poll `check` until it holds or a second has passed
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
