//! HTTP API for the chat assistant
//!
//! One conversation thread per session; mutations go through the session's
//! runtime, updates stream back over SSE.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::gateway::InferenceGateway;
use crate::runtime::{RuntimeSettings, SessionManager};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(gateway: Arc<dyn InferenceGateway>, settings: RuntimeSettings) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(gateway, settings)),
        }
    }
}
