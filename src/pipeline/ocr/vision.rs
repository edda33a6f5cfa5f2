//! Neural OCR: a vision-capable LLM transcribes each band.
//!
//! The provider is resolved once when the engine is created; every band then
//! sends one system prompt plus one image and gets plain text back.

use super::{OcrError, TextExtractor};
use crate::config::VisionOcrConfig;
use crate::error::Web2CsvError;
use crate::pipeline::encode::png_to_image_data;
use crate::pipeline::llm::{chat_with_retry, completion_options, resolve_provider, RetryPolicy};
use crate::prompts::VISION_OCR_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, LLMProvider};
use std::sync::Arc;

/// Vision-model OCR engine.
pub struct VisionOcr {
    provider: Arc<dyn LLMProvider>,
    config: VisionOcrConfig,
}

impl std::fmt::Debug for VisionOcr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionOcr")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl VisionOcr {
    /// Resolve the provider named by `config` (or auto-detect one).
    ///
    /// A missing API key surfaces as [`Web2CsvError::OcrEngineUnavailable`].
    pub fn from_config(config: &VisionOcrConfig) -> Result<Self, Web2CsvError> {
        let provider = resolve_provider(
            None,
            config.provider_name.as_deref(),
            config.model.as_deref(),
        )
        .map_err(|e| Web2CsvError::OcrEngineUnavailable {
            engine: "vision".into(),
            hint: e.to_string(),
        })?;
        Ok(Self::with_provider(provider, config.clone()))
    }

    /// Use an already-built provider.
    pub fn with_provider(provider: Arc<dyn LLMProvider>, config: VisionOcrConfig) -> Self {
        Self { provider, config }
    }
}

#[async_trait]
impl TextExtractor for VisionOcr {
    fn name(&self) -> &str {
        "vision"
    }

    async fn extract(&self, png: &[u8]) -> Result<String, OcrError> {
        let messages = vec![
            ChatMessage::system(VISION_OCR_PROMPT),
            ChatMessage::user_with_images("", vec![png_to_image_data(png)]),
        ];
        let options = completion_options(self.config.temperature, self.config.max_tokens);
        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            backoff_ms: self.config.retry_backoff_ms,
            attempt_timeout: None,
        };

        chat_with_retry(&self.provider, &messages, &options, policy, "vision OCR")
            .await
            .map(|outcome| outcome.content)
            .map_err(OcrError::Engine)
    }
}
