use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{CaptureError, CaptureResult};
use crate::track::Track;

/// Process-wide session flags, persisted across commands until reset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub is_recording: bool,
    /// Bound tab; 0 means none
    pub tab_id: i64,
    /// Most recently reported track
    pub track: Option<Track>,
    /// Tracks delivered in the current session
    pub song_count: u32,
}

/// In-place modification applied by [`SessionStore::update`]
pub type StateUpdate = Box<dyn FnOnce(&mut SessionState) + Send>;

/// Key/value persistence of [`SessionState`]
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self) -> SessionState;

    async fn set(&self, state: SessionState) -> CaptureResult<()>;

    /// Atomic read-modify-write; returns the new state
    async fn update(&self, apply: StateUpdate) -> CaptureResult<SessionState>;

    /// Back to defaults: not recording, no tab, no track, zero songs
    async fn reset(&self) -> CaptureResult<()> {
        self.set(SessionState::default()).await
    }
}

/// Store kept in memory only
#[derive(Default)]
pub struct MemorySessionStore {
    state: RwLock<SessionState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self) -> SessionState {
        self.state.read().await.clone()
    }

    async fn set(&self, state: SessionState) -> CaptureResult<()> {
        *self.state.write().await = state;
        Ok(())
    }

    async fn update(&self, apply: StateUpdate) -> CaptureResult<SessionState> {
        let mut state = self.state.write().await;
        apply(&mut state);
        Ok(state.clone())
    }
}

/// Store backed by a JSON file, cached in memory
pub struct JsonFileSessionStore {
    path: PathBuf,
    state: RwLock<SessionState>,
}

impl JsonFileSessionStore {
    /// Open the store, falling back to defaults when the file is missing or unreadable
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory {:?}", parent))?;
        }

        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Ignoring unreadable session state {:?}: {}", path, e);
                SessionState::default()
            }),
            Err(_) => SessionState::default(),
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    async fn persist(&self, state: &SessionState) -> CaptureResult<()> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| CaptureError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        tokio::fs::write(&self.path, json).await?;

        debug!("Session state saved to {:?}", self.path);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn get(&self) -> SessionState {
        self.state.read().await.clone()
    }

    async fn set(&self, state: SessionState) -> CaptureResult<()> {
        let mut current = self.state.write().await;
        self.persist(&state).await?;
        *current = state;
        Ok(())
    }

    async fn update(&self, apply: StateUpdate) -> CaptureResult<SessionState> {
        let mut current = self.state.write().await;
        let mut next = current.clone();
        apply(&mut next);
        self.persist(&next).await?;
        *current = next.clone();
        Ok(next)
    }
}
