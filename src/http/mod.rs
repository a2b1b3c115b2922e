//! HTTP API server for the page hosting the player
//!
//! This module provides a REST API for controlling the capture session:
//! - POST /capture/start - Prepare the active tab and start capturing
//! - POST /capture/stop - Stop capturing
//! - POST /events - Deliver a `{command, data}` lifecycle message
//! - GET /status - Query session status
//! - GET /health - Health check
//!
//! `HttpContentPort` is the outbound half: it posts commands back to the page.

mod content;
mod handlers;
mod routes;
mod state;

pub use content::HttpContentPort;
pub use routes::create_router;
pub use state::AppState;
