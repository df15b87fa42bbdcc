//! API request and response types

use crate::runtime::ThreadSnapshot;
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Response for a newly opened session
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub thread: ThreadSnapshot,
}

/// Response carrying the current thread
#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub thread: ThreadSnapshot,
}

/// Response for actions that start a completion
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub queued: bool,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
