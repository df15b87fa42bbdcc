//! HTTP chat endpoint
//!
//! Wire contract: `POST {url}` with `{"messages":[{"role","content"}]}`,
//! answered by `{"content": "..."}` or, on failure, `{"error": "..."}`.

use super::{GatewayError, InferenceGateway};
use crate::thread::HistoryEntry;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const FALLBACK_ERROR: &str = "Failed to get response";

/// Gateway backed by an HTTP chat endpoint
pub struct HttpGateway {
    client: Client,
    url: String,
    api_token: Option<String>,
}

impl HttpGateway {
    /// `request_timeout` bounds the whole exchange, body included
    pub fn new(
        url: String,
        api_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            api_token,
        })
    }

    fn classify_error(status: StatusCode, body: &str) -> GatewayError {
        // Surface the endpoint's own message verbatim when it sends one
        let message = serde_json::from_str::<ChatErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.error)
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| FALLBACK_ERROR.to_string());

        match status.as_u16() {
            401 | 403 => GatewayError::auth(message),
            429 => GatewayError::rate_limit(message),
            400 => GatewayError::invalid_request(message),
            500..=599 => GatewayError::server_error(message),
            _ => GatewayError::unknown(message),
        }
    }
}

#[async_trait]
impl InferenceGateway for HttpGateway {
    async fn complete(&self, history: &[HistoryEntry]) -> Result<String, GatewayError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&ChatRequest { messages: history });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::timeout(format!("Request timeout: {e}"))
            } else if e.is_connect() {
                GatewayError::network(format!("Connection failed: {e}"))
            } else {
                GatewayError::unknown(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::unknown(format!("Failed to parse response: {e}")))?;

        Ok(parsed.content)
    }

    fn name(&self) -> &str {
        &self.url
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [HistoryEntry],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatErrorBody {
    error: Option<String>,
}
