use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ports::TabId;
use crate::track::Track;

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Preparing,
    Recording,
    Stopping,
}

/// Snapshot of a capture session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub state: CaptureState,

    /// Persisted recording flag
    pub is_recording: bool,

    /// Bound tab, 0 when none
    pub tab_id: TabId,

    /// When capture started
    pub started_at: Option<DateTime<Utc>>,

    /// Time since capture started, in seconds
    pub duration_secs: f64,

    /// Tracks delivered in this session
    pub song_count: u32,

    /// Most recently reported track
    pub track: Option<Track>,
}
