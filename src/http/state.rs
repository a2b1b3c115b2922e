use crate::session::ControllerHandle;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single capture session controller
    pub controller: ControllerHandle,
}

impl AppState {
    pub fn new(controller: ControllerHandle) -> Self {
        Self { controller }
    }
}
