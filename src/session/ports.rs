//! Interfaces to the collaborators around a capture session.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::audio::AudioBackend;
use crate::error::CaptureResult;

pub type TabId = i64;

/// Answer to `prepareRecording`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareResponse {
    /// Player volume before it was raised for capture
    pub volume: f32,
    /// Set when the page refuses (e.g. playback on a remote device)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The page hosting the player
#[async_trait::async_trait]
pub trait ContentPort: Send + Sync {
    /// Single round trip; the page raises its volume and takes over the volume control
    async fn prepare_recording(&self, tab: TabId) -> CaptureResult<PrepareResponse>;

    /// Ask the page to start playback
    async fn start_recording(&self, tab: TabId) -> CaptureResult<()>;

    /// Hand the volume control back and pause playback
    async fn stop_recording(&self, tab: TabId, volume: f32) -> CaptureResult<()>;
}

/// Tab discovery and tab audio capture
#[async_trait::async_trait]
pub trait TabCapture: Send + Sync {
    /// Currently focused tab
    async fn active_tab(&self) -> CaptureResult<TabId>;

    /// Capturable audio stream of `tab`
    async fn capture(&self, tab: TabId) -> CaptureResult<Box<dyn AudioBackend>>;

    async fn tab_exists(&self, tab: TabId) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IconState {
    Default,
    Recording,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notification {
    Stopped,
    /// A track was saved; carries the running count for the session
    Downloaded { artist: String, title: String, song_count: u32 },
    Error { message: String },
}

/// Status UI: icon, notifications and progress
pub trait Presenter: Send + Sync {
    fn set_icon(&self, icon: IconState);

    fn notify(&self, notification: Notification);

    fn progress(&self, _progress: f32) {}
}

/// Presenter that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn set_icon(&self, icon: IconState) {
        info!("Icon: {:?}", icon);
    }

    fn notify(&self, notification: Notification) {
        match notification {
            Notification::Stopped => info!("Recording stopped"),
            Notification::Downloaded { artist, title, song_count } => {
                info!("Saved {} - {} ({} this session)", artist, title, song_count)
            }
            Notification::Error { message } => error!("{}", message),
        }
    }

    fn progress(&self, progress: f32) {
        info!("Encoding: {:.0}%", progress * 100.0);
    }
}
