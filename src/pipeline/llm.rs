//! LLM plumbing shared by the vision OCR engine and the structuring client:
//! provider resolution and a chat call with retry/backoff.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! avoids thundering-herd: with 500 ms base and 3 retries the wait sequence
//! is 500 ms → 1 s → 2 s.

use crate::config::DEFAULT_MODEL;
use crate::error::Web2CsvError;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Successful chat completion.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u32,
    pub duration_ms: u64,
}

/// Retry policy for [`chat_with_retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    /// Per-attempt timeout; `None` waits for the provider's own timeout.
    pub attempt_timeout: Option<Duration>,
}

/// Call `provider` until it answers or the retries are exhausted.
///
/// `label` only appears in log lines (e.g. `"band 3"`, `"structuring"`).
/// Returns the last error message when every attempt failed.
pub async fn chat_with_retry(
    provider: &Arc<dyn LLMProvider>,
    messages: &[ChatMessage],
    options: &CompletionOptions,
    policy: RetryPolicy,
    label: &str,
) -> Result<ChatOutcome, String> {
    let start = Instant::now();
    let mut last_err: Option<String> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                label, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let call = provider.chat(messages, Some(options));
        let result = match policy.attempt_timeout {
            Some(t) => match tokio::time::timeout(t, call).await {
                Ok(r) => r.map_err(|e| e.to_string()),
                Err(_) => Err(format!("timed out after {}s", t.as_secs())),
            },
            None => call.await.map_err(|e| e.to_string()),
        };

        match result {
            Ok(response) => {
                let duration = start.elapsed();
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    label, response.prompt_tokens, response.completion_tokens, duration
                );
                return Ok(ChatOutcome {
                    content: response.content,
                    input_tokens: response.prompt_tokens as usize,
                    output_tokens: response.completion_tokens as usize,
                    retries: attempt,
                    duration_ms: duration.as_millis() as u64,
                });
            }
            Err(err_msg) => {
                warn!("{}: attempt {} failed — {}", label, attempt + 1, err_msg);
                last_err = Some(err_msg);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| "Unknown error".to_string()))
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** — used as-is.
/// 2. **Named provider** (+ optional model) — built by
///    [`ProviderFactory::create_llm_provider`], which reads the matching API key.
/// 3. **`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`** — both set means the
///    execution environment chose for us.
/// 4. **`OPENAI_API_KEY`** — OpenAI wins when several keys are present.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(
    provider: Option<&Arc<dyn LLMProvider>>,
    provider_name: Option<&str>,
    model: Option<&str>,
) -> Result<Arc<dyn LLMProvider>, Web2CsvError> {
    if let Some(provider) = provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(name) = provider_name {
        return create_provider(name, model.unwrap_or(DEFAULT_MODEL));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model.unwrap_or(DEFAULT_MODEL));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Web2CsvError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Web2CsvError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Web2CsvError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Build `CompletionOptions` from a temperature / token budget pair.
pub fn completion_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_options_carry_values() {
        let opts = completion_options(0.1, 2000);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(2000));
    }
}
