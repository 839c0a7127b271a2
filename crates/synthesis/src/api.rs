//! REST client for the Ollama `/api/generate` endpoint.
//!
//! Only the non-streaming JSON mode is used: one request, one response
//! whose `response` field carries the model's text.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// HTTP client for one Ollama-compatible service.
#[derive(Debug, Clone)]
pub struct OllamaApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of `POST /api/generate`.
#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    /// Ask the model to constrain its output to JSON.
    pub format: &'static str,
    pub stream: bool,
}

/// The fields of the non-streaming reply this crate relies on.
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

/// Errors from the Ollama REST layer.
#[derive(Debug, thiserror::Error)]
pub enum OllamaApiError {
    /// The HTTP request itself failed (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Ollama returned a non-2xx status code.
    #[error("Ollama API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// A 2xx body that is not a generate reply.
    #[error("Malformed generate reply: {0}")]
    Malformed(String),
}

impl OllamaApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://localhost:11434`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Run one non-streaming JSON-mode generation and return the model's
    /// raw text.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, OllamaApiError> {
        let body = GenerateRequest {
            model,
            prompt,
            format: "json",
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.api_url))
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(OllamaApiError::ApiError {
                status: status.as_u16(),
                body: text,
            });
        }

        let reply: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| OllamaApiError::Malformed(e.to_string()))?;
        if !reply.done {
            tracing::debug!("Generate reply not marked done");
        }
        Ok(reply.response)
    }
}
