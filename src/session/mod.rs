//! Capture session management
//!
//! This module provides the `CaptureController` state machine that manages:
//! - Tab preparation and audio capture
//! - Track boundaries forwarded to the recorder bridge
//! - Delivery of finished tracks to the downloader
//! - Persisted session flags and crash recovery

mod controller;
mod events;
mod ports;
mod stats;
mod store;

pub use controller::{CaptureController, ControllerConfig, ControllerHandle, ControllerPorts};
pub use events::{Message, SessionEvent, TabStatus};
pub use ports::{
    ContentPort, IconState, LogPresenter, Notification, Presenter, PrepareResponse, TabCapture, TabId,
};
pub use stats::{CaptureState, SessionStats};
pub use store::{JsonFileSessionStore, MemorySessionStore, SessionState, SessionStore, StateUpdate};
