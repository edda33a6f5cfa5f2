//! The "structure" operation: ordered records + two free-text hints → CSV.
//!
//! The records are rendered as one delimited text block (see
//! [`crate::prompts::render_records_block`]) and handed to a
//! [`TableStructurer`]. The production implementation, [`LlmStructurer`],
//! asks an LLM to clean the OCR noise and lay the data out as CSV.
//!
//! A structurer answers with either a table or an explicit absence of one.
//! Absence, an empty reply, or a provider that keeps failing all surface as
//! [`Web2CsvError::StructuringFailed`]. That error is not fatal: the records
//! are untouched and the caller can try again with different hints.

use crate::config::StructuringConfig;
use crate::error::Web2CsvError;
use crate::output::{StructuredOutput, TextRecord};
use crate::pipeline::llm::{chat_with_retry, completion_options, resolve_provider, RetryPolicy};
use crate::pipeline::postprocess;
use crate::prompts::{build_structuring_prompt, render_records_block, STRUCTURING_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, LLMProvider};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Everything a structurer needs for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringRequest {
    /// What the webpage contains, in the caller's words.
    pub page_description: String,
    /// The table the caller expects back.
    pub expected_data: String,
    /// Records rendered as `Chunk {i}:` sections, ascending.
    pub records_block: String,
}

impl StructuringRequest {
    pub fn new(records: &[TextRecord], page_description: &str, expected_data: &str) -> Self {
        Self {
            page_description: page_description.trim().to_string(),
            expected_data: expected_data.trim().to_string(),
            records_block: render_records_block(records),
        }
    }
}

/// A structurer's raw answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuringReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl From<String> for StructuringReply {
    fn from(content: String) -> Self {
        Self {
            content,
            ..Default::default()
        }
    }
}

/// The text-to-table capability.
///
/// `Ok(None)` is the explicit "no structured result" signal.
#[async_trait]
pub trait TableStructurer: Send + Sync {
    async fn structure(
        &self,
        request: &StructuringRequest,
    ) -> Result<Option<StructuringReply>, Web2CsvError>;
}

/// Structures records with an LLM provider.
pub struct LlmStructurer {
    provider: Arc<dyn LLMProvider>,
    config: StructuringConfig,
}

impl std::fmt::Debug for LlmStructurer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmStructurer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LlmStructurer {
    /// Resolve the provider described by `config`.
    pub fn from_config(config: &StructuringConfig) -> Result<Self, Web2CsvError> {
        let provider = resolve_provider(
            config.provider.as_ref(),
            config.provider_name.as_deref(),
            config.model.as_deref(),
        )?;
        Ok(Self {
            provider,
            config: config.clone(),
        })
    }

    fn messages(&self, request: &StructuringRequest) -> Vec<ChatMessage> {
        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(STRUCTURING_SYSTEM_PROMPT);
        vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(build_structuring_prompt(
                &request.page_description,
                &request.expected_data,
                &request.records_block,
            )),
        ]
    }
}

#[async_trait]
impl TableStructurer for LlmStructurer {
    async fn structure(
        &self,
        request: &StructuringRequest,
    ) -> Result<Option<StructuringReply>, Web2CsvError> {
        let messages = self.messages(request);
        let options = completion_options(self.config.temperature, self.config.max_tokens);
        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            backoff_ms: self.config.retry_backoff_ms,
            attempt_timeout: Some(Duration::from_secs(self.config.api_timeout_secs)),
        };

        let outcome = chat_with_retry(&self.provider, &messages, &options, policy, "structuring")
            .await
            .map_err(|reason| Web2CsvError::StructuringFailed { reason })?;

        if outcome.content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(StructuringReply {
            content: outcome.content,
            input_tokens: outcome.input_tokens,
            output_tokens: outcome.output_tokens,
        }))
    }
}

/// Structure `records` into CSV with the LLM described by `config`.
///
/// # Errors
/// - [`Web2CsvError::ProviderNotConfigured`] when no provider can be resolved
/// - [`Web2CsvError::StructuringFailed`] when no usable CSV came back
pub async fn structure(
    records: &[TextRecord],
    page_description: &str,
    expected_data: &str,
    config: &StructuringConfig,
) -> Result<StructuredOutput, Web2CsvError> {
    let structurer = LlmStructurer::from_config(config)?;
    structure_with(&structurer, records, page_description, expected_data).await
}

/// [`structure`] with an explicit structurer.
///
/// Records whose text is empty everywhere are rejected without a call:
/// there is nothing to structure.
pub async fn structure_with(
    structurer: &dyn TableStructurer,
    records: &[TextRecord],
    page_description: &str,
    expected_data: &str,
) -> Result<StructuredOutput, Web2CsvError> {
    let start = Instant::now();

    if records.iter().all(TextRecord::is_empty) {
        return Err(Web2CsvError::StructuringFailed {
            reason: format!("no text to structure ({} records, all empty)", records.len()),
        });
    }

    let request = StructuringRequest::new(records, page_description, expected_data);
    info!(
        "Structuring {} records ({} chars of text)",
        records.len(),
        request.records_block.chars().count()
    );

    let reply = structurer
        .structure(&request)
        .await?
        .ok_or_else(|| Web2CsvError::StructuringFailed {
            reason: "the model returned no result".into(),
        })?;

    let csv = postprocess::clean_csv(&reply.content);
    if csv.is_empty() {
        warn!("Structuring reply contained no CSV");
        return Err(Web2CsvError::StructuringFailed {
            reason: "the model returned an empty table".into(),
        });
    }

    let (row_count, column_count) = postprocess::csv_census(&csv);
    let duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Structured into {} rows × {} columns in {}ms",
        row_count, column_count, duration_ms
    );

    Ok(StructuredOutput {
        csv,
        row_count,
        column_count,
        input_tokens: reply.input_tokens,
        output_tokens: reply.output_tokens,
        duration_ms,
    })
}

/// Synchronous wrapper around [`structure`].
pub fn structure_sync(
    records: &[TextRecord],
    page_description: &str,
    expected_data: &str,
    config: &StructuringConfig,
) -> Result<StructuredOutput, Web2CsvError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Web2CsvError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(structure(records, page_description, expected_data, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replies with a canned answer and remembers the request it saw.
    struct Canned {
        reply: Option<String>,
        seen: Mutex<Option<StructuringRequest>>,
    }

    impl Canned {
        fn new(reply: Option<&str>) -> Self {
            Self {
                reply: reply.map(str::to_string),
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl TableStructurer for Canned {
        async fn structure(
            &self,
            request: &StructuringRequest,
        ) -> Result<Option<StructuringReply>, Web2CsvError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            Ok(self.reply.clone().map(StructuringReply::from))
        }
    }

    fn records() -> Vec<TextRecord> {
        vec![
            TextRecord::new(0, 0, 800, "Widget $10".into()),
            TextRecord::new(1, 750, 1550, "Gadget $12".into()),
        ]
    }

    #[tokio::test]
    async fn csv_is_cleaned_and_counted() {
        let s = Canned::new(Some("```csv\r\nname,price\r\nWidget,10\r\nGadget,12\r\n```"));
        let out = structure_with(&s, &records(), "shop", "name, price").await.unwrap();
        assert_eq!(out.csv, "name,price\nWidget,10\nGadget,12\n");
        assert_eq!((out.row_count, out.column_count), (2, 2));

        let seen = s.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.page_description, "shop");
        assert!(seen.records_block.starts_with("Chunk 0:\nWidget $10"));
    }

    #[tokio::test]
    async fn absence_signal_is_structuring_failure() {
        let err = structure_with(&Canned::new(None), &records(), "shop", "prices")
            .await
            .unwrap_err();
        assert!(matches!(err, Web2CsvError::StructuringFailed { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn blank_reply_is_structuring_failure() {
        let err = structure_with(&Canned::new(Some("```csv\n\n```")), &records(), "a", "b")
            .await
            .unwrap_err();
        assert!(matches!(err, Web2CsvError::StructuringFailed { .. }));
    }

    #[tokio::test]
    async fn all_empty_records_skip_the_model() {
        let s = Canned::new(Some("a,b\n1,2"));
        let empty = vec![TextRecord::new(0, 0, 10, String::new())];
        let err = structure_with(&s, &empty, "a", "b").await.unwrap_err();
        assert!(matches!(err, Web2CsvError::StructuringFailed { .. }));
        assert!(s.seen.lock().unwrap().is_none());

        let err = structure_with(&s, &[], "a", "b").await.unwrap_err();
        assert!(matches!(err, Web2CsvError::StructuringFailed { .. }));
    }

    #[test]
    fn request_trims_hints() {
        let r = StructuringRequest::new(&records(), "  shop \n", "\tname ");
        assert_eq!(r.page_description, "shop");
        assert_eq!(r.expected_data, "name");
    }
}
