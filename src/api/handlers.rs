//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ChatRequest, ErrorResponse, QueuedResponse, SessionResponse, SuccessResponse, ThreadResponse,
};
use super::AppState;
use crate::runtime::{DispatchError, ThreadHandle};
use crate::state_machine::TransitionError;
use crate::thread::TurnId;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Session lifecycle
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/end", post(end_session))
        // SSE streaming
        .route("/api/sessions/:id/stream", get(stream_session))
        // User actions
        .route("/api/sessions/:id/chat", post(send_chat))
        .route(
            "/api/sessions/:id/turns/:turn_id/delete",
            post(delete_turn),
        )
        .route(
            "/api/sessions/:id/turns/:turn_id/rewrite",
            post(rewrite_turn),
        )
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

async fn session(state: &AppState, id: &str) -> Result<ThreadHandle, AppError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))
}

// ============================================================
// Session Lifecycle
// ============================================================

async fn create_session(State(state): State<AppState>) -> Json<SessionResponse> {
    let (session_id, handle) = state.sessions.create().await;
    Json(SessionResponse {
        session_id,
        thread: handle.snapshot(),
    })
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThreadResponse>, AppError> {
    let handle = session(&state, &id).await?;
    Ok(Json(ThreadResponse {
        thread: handle.snapshot(),
    }))
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    if !state.sessions.end(&id).await {
        return Err(AppError::NotFound(format!("Session {id} not found")));
    }
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// SSE Streaming
// ============================================================

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let handle = session(&state, &id).await?;
    Ok(sse_stream(handle))
}

// ============================================================
// User Actions
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<QueuedResponse>, AppError> {
    let handle = session(&state, &id).await?;
    handle.send(req.text).await?;
    Ok(Json(QueuedResponse { queued: true }))
}

async fn delete_turn(
    State(state): State<AppState>,
    Path((id, turn_id)): Path<(String, String)>,
) -> Result<Json<ThreadResponse>, AppError> {
    let handle = session(&state, &id).await?;
    let thread = handle.delete_turn(TurnId::from(turn_id)).await?;
    Ok(Json(ThreadResponse { thread }))
}

async fn rewrite_turn(
    State(state): State<AppState>,
    Path((id, turn_id)): Path<(String, String)>,
) -> Result<Json<QueuedResponse>, AppError> {
    let handle = session(&state, &id).await?;
    handle.rewrite(TurnId::from(turn_id)).await?;
    Ok(Json(QueuedResponse { queued: true }))
}

async fn get_version() -> &'static str {
    concat!("peplike-assistant ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Rejected(reason) => match reason {
                TransitionError::EmptyMessage
                | TransitionError::NotRewritable(_)
                | TransitionError::MissingPrompt(_) => AppError::BadRequest(reason.to_string()),
                TransitionError::Busy => AppError::Conflict(reason.to_string()),
                TransitionError::UnknownTurn(_) => AppError::NotFound(reason.to_string()),
                TransitionError::InvalidTransition(_) => AppError::Internal(reason.to_string()),
            },
            DispatchError::RuntimeStopped => {
                AppError::NotFound("Session has ended".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
