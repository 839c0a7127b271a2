//! The [`ScriptSynthesizer`] seam and its Ollama implementation.

use std::time::Duration;

use artisan_core::parameters::GenerationParameters;

use crate::api::{OllamaApi, OllamaApiError};
use crate::error::SynthesisError;
use crate::prompt::build_meta_prompt;
use crate::response::{parse_model_output, SynthesizedScript};

/// Default Ollama base URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default model name.
pub const DEFAULT_OLLAMA_MODEL: &str = "codellama";

/// Default per-request timeout (2 minutes).
pub const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(120);

/// Produces a validated script for a prompt.
pub trait ScriptSynthesizer: Send + Sync {
    fn synthesize(
        &self,
        prompt: &str,
        parameters: &GenerationParameters,
    ) -> impl std::future::Future<Output = Result<SynthesizedScript, SynthesisError>> + Send;
}

#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            timeout: DEFAULT_SYNTHESIS_TIMEOUT,
        }
    }
}

/// [`ScriptSynthesizer`] backed by an Ollama service.
#[derive(Debug, Clone)]
pub struct OllamaSynthesizer {
    api: OllamaApi,
    config: SynthesisConfig,
}

impl OllamaSynthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self {
            api: OllamaApi::new(config.base_url.clone()),
            config,
        }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }
}

impl From<OllamaApiError> for SynthesisError {
    fn from(err: OllamaApiError) -> Self {
        match err {
            OllamaApiError::Request(e) if e.is_timeout() => {
                SynthesisError::Unavailable(format!("request timed out: {e}"))
            }
            OllamaApiError::Request(e) => SynthesisError::Unavailable(e.to_string()),
            OllamaApiError::ApiError { status, body } => {
                let body: String = body.chars().take(512).collect();
                SynthesisError::Unavailable(format!("status {status}: {body}"))
            }
            OllamaApiError::Malformed(msg) => SynthesisError::InvalidOutput(msg),
        }
    }
}

impl ScriptSynthesizer for OllamaSynthesizer {
    async fn synthesize(
        &self,
        prompt: &str,
        parameters: &GenerationParameters,
    ) -> Result<SynthesizedScript, SynthesisError> {
        let meta_prompt = build_meta_prompt(prompt, parameters);

        tracing::debug!(
            model = %self.config.model,
            url = %self.api.api_url(),
            "Requesting script synthesis",
        );

        let text = self
            .api
            .generate(&self.config.model, &meta_prompt, self.config.timeout)
            .await?;

        let script = parse_model_output(&text)?;
        tracing::debug!(script_bytes = script.as_str().len(), "Script synthesized");
        Ok(script)
    }
}
