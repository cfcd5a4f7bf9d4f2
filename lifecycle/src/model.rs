//! The generation-model collaborator.
//!
//! The lifecycle consumes an opaque text-completion service. Its output is
//! never trusted: every response goes through the strict parsers in
//! [`crate::parse`] before it becomes a spec, artifact, or test suite.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors from the generation model boundary.
///
/// Everything except [`ModelError::Cancelled`] is treated as a generation
/// failure by the lifecycle and consumes a retry attempt.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The API returned a non-success status.
    #[error("model api request failed: {0}")]
    ApiRequest(String),

    /// The API responded with an unexpected shape.
    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    /// HTTP transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// No response within the bounded wait.
    #[error("model timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled; the response was abandoned.
    #[error("model call cancelled")]
    Cancelled,
}

/// Trait for the text-generation collaborator.
#[async_trait]
pub trait GenerationModel: Send + Sync {
    /// Model identifier recorded in provenance.
    fn model_id(&self) -> &str;

    /// Produce a completion for the given system framing and prompt.
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, ModelError>;
}

/// Generation model backed by an Ollama server.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a client for the given model against the default local
    /// endpoint.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Set the server base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the bounded wait for one completion.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl GenerationModel for OllamaClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, ModelError> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "requesting completion");

        let body = serde_json::json!({
            "model": self.model,
            "system": system,
            "prompt": prompt,
            "stream": false,
        });

        let request = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send();

        let response = tokio::select! {
            response = request => response?,
            _ = tokio::time::sleep(self.timeout) => return Err(ModelError::Timeout(self.timeout)),
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
        };

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelError::ApiRequest(format!("{status}: {detail}")));
        }

        let payload: OllamaGenerateResponse = tokio::select! {
            payload = response.json() => payload.map_err(|e| ModelError::InvalidResponse(e.to_string()))?,
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
        };

        Ok(payload.response)
    }
}
