//! LLM interaction: the text-generation seam and its edgequake backend.
//!
//! The rest of the crate only sees [`TextGenerator`]: one request in, one
//! reply out, no streaming. [`ProviderGenerator`] adapts any
//! `edgequake_llm::LLMProvider` to it, so every provider the factory knows
//! (OpenAI, Anthropic, Gemini, Azure, Ollama…) works unchanged, and tests
//! substitute an in-process double.
//!
//! No retry loop here: a failed call is reported once
//! and the user decides whether to try again.

use crate::config::RefineConfig;
use crate::error::SanitizeError;
use crate::prompts::{document_message, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// A single sanitization request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// The raw reply of a text generator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedText {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Anything that can answer a [`GenerationRequest`].
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short label for logs ("openai/gpt-4.1-mini", "mock"…).
    fn name(&self) -> &str;

    /// Run the request. Errors are reported as human-readable strings; the
    /// caller folds them into [`SanitizeError::Request`].
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, String>;
}

/// [`TextGenerator`] backed by an edgequake-llm provider.
pub struct ProviderGenerator {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl ProviderGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for ProviderGenerator {
    fn name(&self) -> &str {
        &self.label
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, String> {
        let messages = vec![
            ChatMessage::system(request.system_prompt.as_str()),
            ChatMessage::user(request.user_message.as_str()),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| e.to_string())?;

        Ok(GeneratedText {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Build the request for already-truncated document text.
pub fn build_request(text: &str, config: &RefineConfig) -> GenerationRequest {
    GenerationRequest {
        system_prompt: config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        user_message: document_message(text),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    }
}

/// Send one request, bounded by `api_timeout_secs`.
///
/// Returns the raw reply and the wall-clock duration in milliseconds.
pub async fn request_cleanup(
    generator: &Arc<dyn TextGenerator>,
    request: &GenerationRequest,
    config: &RefineConfig,
) -> Result<(GeneratedText, u64), SanitizeError> {
    let start = Instant::now();
    let secs = config.api_timeout_secs;

    let reply = match timeout(Duration::from_secs(secs), generator.generate(request)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            warn!("{}: sanitization request failed: {}", generator.name(), e);
            return Err(SanitizeError::Request(e));
        }
        Err(_) => {
            warn!("{}: sanitization request timed out after {}s", generator.name(), secs);
            return Err(SanitizeError::Timeout { secs });
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    debug!(
        "{}: {} input tokens, {} output tokens, {}ms",
        generator.name(),
        reply.input_tokens,
        reply.output_tokens,
        duration_ms
    );

    if reply.content.trim().is_empty() {
        return Err(SanitizeError::EmptyResponse);
    }
    Ok((reply, duration_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<GeneratedText, String>);

    #[async_trait]
    impl TextGenerator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedText, String> {
            self.0.clone()
        }
    }

    struct Slow;

    #[async_trait]
    impl TextGenerator for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedText, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(GeneratedText::default())
        }
    }

    #[test]
    fn build_request_defaults() {
        let config = RefineConfig::default();
        let req = build_request("Hello", &config);
        assert_eq!(req.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(req.user_message.contains("Hello"));
        assert_eq!(req.temperature, 0.1);
        assert_eq!(req.max_tokens, 8192);
    }

    #[test]
    fn build_request_honours_override() {
        let config = RefineConfig::builder()
            .system_prompt("custom")
            .build()
            .unwrap();
        assert_eq!(build_request("x", &config).system_prompt, "custom");
    }

    #[tokio::test]
    async fn request_error_is_reported_once() {
        let generator: Arc<dyn TextGenerator> = Arc::new(Fixed(Err("HTTP 503".into())));
        let config = RefineConfig::default();
        let req = build_request("x", &config);
        let err = request_cleanup(&generator, &req, &config).await.unwrap_err();
        assert_eq!(err, SanitizeError::Request("HTTP 503".into()));
    }

    #[tokio::test]
    async fn blank_reply_is_empty_response() {
        let generator: Arc<dyn TextGenerator> = Arc::new(Fixed(Ok(GeneratedText {
            content: "  \n".into(),
            ..Default::default()
        })));
        let config = RefineConfig::default();
        let req = build_request("x", &config);
        let err = request_cleanup(&generator, &req, &config).await.unwrap_err();
        assert_eq!(err, SanitizeError::EmptyResponse);
    }

    #[tokio::test]
    async fn slow_reply_times_out() {
        let generator: Arc<dyn TextGenerator> = Arc::new(Slow);
        let config = RefineConfig::builder().api_timeout_secs(1).build().unwrap();
        let req = build_request("x", &config);
        let err = request_cleanup(&generator, &req, &config).await.unwrap_err();
        assert_eq!(err, SanitizeError::Timeout { secs: 1 });
    }
}
