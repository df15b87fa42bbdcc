//! Inference gateway abstraction
//!
//! The gateway turns a full conversation history into one assistant reply.
//! It keeps no memory between calls; callers send exactly the context that
//! should be considered.

mod error;
mod http;

pub use error::{GatewayError, GatewayErrorKind};
pub use http::HttpGateway;

use crate::thread::HistoryEntry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Common interface for completion backends
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// Produce the assistant reply for `history`
    async fn complete(&self, history: &[HistoryEntry]) -> Result<String, GatewayError>;

    /// Name used in logs
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: InferenceGateway + ?Sized> InferenceGateway for Arc<T> {
    async fn complete(&self, history: &[HistoryEntry]) -> Result<String, GatewayError> {
        (**self).complete(history).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Configuration for the inference gateway
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Full URL of the chat completion endpoint
    pub url: Option<String>,
    /// Bearer token sent with each request
    pub api_token: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("PEPLIKE_GATEWAY_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            api_token: std::env::var("PEPLIKE_GATEWAY_TOKEN")
                .ok()
                .filter(|token| !token.is_empty()),
        }
    }

    /// Build the configured gateway, wrapped with logging
    pub fn build(
        &self,
        request_timeout: Duration,
    ) -> Result<Arc<dyn InferenceGateway>, GatewayError> {
        let inner: Arc<dyn InferenceGateway> = match &self.url {
            Some(url) => Arc::new(HttpGateway::new(
                url.clone(),
                self.api_token.clone(),
                request_timeout,
            )?),
            None => Arc::new(UnconfiguredGateway),
        };
        Ok(Arc::new(LoggingGateway::new(inner)))
    }
}

/// Logging wrapper for gateways
pub struct LoggingGateway {
    inner: Arc<dyn InferenceGateway>,
    name: String,
}

impl LoggingGateway {
    pub fn new(inner: Arc<dyn InferenceGateway>) -> Self {
        let name = inner.name().to_string();
        Self { inner, name }
    }
}

#[async_trait]
impl InferenceGateway for LoggingGateway {
    async fn complete(&self, history: &[HistoryEntry]) -> Result<String, GatewayError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(history).await;
        let duration = start.elapsed();

        match &result {
            Ok(content) => {
                tracing::info!(
                    gateway = %self.name,
                    duration_ms = %duration.as_millis(),
                    history_len = history.len(),
                    reply_chars = content.chars().count(),
                    "Completion succeeded"
                );
            }
            Err(e) => {
                tracing::error!(
                    gateway = %self.name,
                    duration_ms = %duration.as_millis(),
                    history_len = history.len(),
                    error = %e.message,
                    kind = ?e.kind,
                    "Completion failed"
                );
            }
        }

        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Stand-in used when no gateway URL is configured
pub struct UnconfiguredGateway;

#[async_trait]
impl InferenceGateway for UnconfiguredGateway {
    async fn complete(&self, _history: &[HistoryEntry]) -> Result<String, GatewayError> {
        Err(GatewayError::unavailable(
            "No inference gateway configured. Set PEPLIKE_GATEWAY_URL.",
        ))
    }

    fn name(&self) -> &str {
        "unconfigured"
    }
}
