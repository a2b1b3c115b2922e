use super::state::AppState;
use crate::error::CaptureError;
use crate::session::{Message, SessionEvent};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

fn ok() -> Response {
    (StatusCode::OK, Json(SuccessResponse { success: true })).into_response()
}

fn failure(e: CaptureError) -> Response {
    let status = match &e {
        CaptureError::InvalidState(_) => StatusCode::CONFLICT,
        CaptureError::Configuration(_) => StatusCode::BAD_REQUEST,
        CaptureError::Permission(_) => StatusCode::FORBIDDEN,
        CaptureError::Device(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: e.code(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /capture/start
/// Prepare the active tab and start capturing it
pub async fn start_capture(State(state): State<AppState>) -> impl IntoResponse {
    info!("Starting capture");

    match state.controller.start_capture().await {
        Ok(()) => ok(),
        Err(e) => {
            error!("Failed to start capture: {}", e);
            failure(e)
        }
    }
}

/// POST /capture/stop
pub async fn stop_capture(State(state): State<AppState>) -> impl IntoResponse {
    info!("Stopping capture");

    match state.controller.stop_capture().await {
        Ok(()) => ok(),
        Err(e) => {
            error!("Failed to stop capture: {}", e);
            failure(e)
        }
    }
}

/// POST /events
/// Deliver one `{command, data}` message from the page
pub async fn post_event(
    State(state): State<AppState>,
    payload: Result<Json<Message>, JsonRejection>,
) -> impl IntoResponse {
    let message = match payload {
        Ok(Json(message)) => message,
        Err(rejection) => {
            warn!("Rejected event body: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: rejection.body_text(),
                    code: "INVALID_BODY",
                }),
            )
                .into_response();
        }
    };

    let event = match SessionEvent::try_from(message) {
        Ok(event) => event,
        Err(reason) => {
            warn!("{}", reason);
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: reason,
                    code: "UNKNOWN_COMMAND",
                }),
            )
                .into_response();
        }
    };

    match state.controller.send_event(event).await {
        Ok(()) => ok(),
        Err(e) => {
            error!("Failed to handle event: {}", e);
            failure(e)
        }
    }
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => failure(e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
