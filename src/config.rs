//! Configuration types for webpage extraction and structuring.
//!
//! The two public operations each take one config struct:
//! [`ExtractionConfig`] drives render → tile → OCR, and
//! [`StructuringConfig`] drives the LLM that turns the records into CSV.
//! Both are built through consuming builders whose setters clamp values and
//! whose `build()` rejects combinations that can never work, so a bad
//! configuration fails before a browser is ever launched.

use crate::error::Web2CsvError;
use crate::pipeline::ocr::TextExtractor;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default band height in pixels.
pub const DEFAULT_CHUNK_HEIGHT: u32 = 800;

/// Default vertical overlap between consecutive bands in pixels.
pub const DEFAULT_OVERLAP: u32 = 50;

/// Default model used when a provider is resolved without an explicit model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

// ── Extraction ───────────────────────────────────────────────────────────

/// Configuration for the "extract" operation.
///
/// # Example
/// ```rust
/// use edgequake_web2csv::{ExtractionConfig, OcrEngineKind};
///
/// let config = ExtractionConfig::builder()
///     .chunk_height(1000)
///     .overlap(80)
///     .ocr_engine(OcrEngineKind::Tesseract)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_height, 1000);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Maximum band height in pixels. Default: 800.
    pub chunk_height: u32,

    /// Pixels shared by consecutive bands so no glyph is cut at a seam. Default: 50.
    ///
    /// Must be strictly smaller than `chunk_height`.
    pub overlap: u32,

    /// Window used for the first load, before the full-document resize.
    pub viewport: ViewportPolicy,

    /// Settle period after navigation, in milliseconds. Default: 3000.
    pub load_settle_ms: u64,

    /// Settle period after the viewport resize (reflow), in milliseconds. Default: 2000.
    pub resize_settle_ms: u64,

    /// Timeout for browser start-up and each DevTools call, in seconds. Default: 60.
    pub navigation_timeout_secs: u64,

    /// Deadline for the whole extraction, in seconds. Default: 600.
    ///
    /// On expiry the browser session and every in-flight OCR call are
    /// abandoned and no partial records are returned.
    pub pipeline_timeout_secs: u64,

    /// Cap on the captured document height in pixels. Default: 32 000.
    ///
    /// Infinite-scroll pages can report absurd heights; anything beyond the
    /// cap is clipped (with a warning) rather than exhausting memory.
    pub max_document_height: u32,

    /// Explicit browser executable. Falls back to `CHROME_PATH`, then `PATH`.
    pub browser_path: Option<PathBuf>,

    /// Attach to a running browser through this DevTools WebSocket URL.
    pub browser_ws_url: Option<String>,

    /// Attach to a running browser listening on this remote-debugging port.
    pub browser_debug_port: Option<u16>,

    /// OCR engine used for every band. Default: [`OcrEngineKind::Tesseract`].
    pub ocr_engine: OcrEngineKind,

    /// Pre-constructed engine. Takes precedence over `ocr_engine`.
    pub extractor: Option<Arc<dyn TextExtractor>>,

    /// Bands processed concurrently. Default: 4.
    ///
    /// Results are reassembled by band index, so this never changes output order.
    pub concurrency: usize,

    /// Per-band OCR timeout in seconds. Default: 120.
    pub ocr_timeout_secs: u64,

    /// Explicit `tesseract` executable. Falls back to `PATH`.
    pub tesseract_path: Option<PathBuf>,

    /// Tesseract language pack(s), e.g. `"eng"` or `"eng+deu"`. Default: `"eng"`.
    pub tesseract_lang: String,

    /// Tesseract page segmentation mode (0–13). Default: 3 (fully automatic).
    pub tesseract_psm: u8,

    /// Settings for the neural (vision model) engine.
    pub vision: VisionOcrConfig,

    /// Optional observer for render and per-band events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            chunk_height: DEFAULT_CHUNK_HEIGHT,
            overlap: DEFAULT_OVERLAP,
            viewport: ViewportPolicy::default(),
            load_settle_ms: 3000,
            resize_settle_ms: 2000,
            navigation_timeout_secs: 60,
            pipeline_timeout_secs: 600,
            max_document_height: 32_000,
            browser_path: None,
            browser_ws_url: None,
            browser_debug_port: None,
            ocr_engine: OcrEngineKind::default(),
            extractor: None,
            concurrency: 4,
            ocr_timeout_secs: 120,
            tesseract_path: None,
            tesseract_lang: "eng".to_string(),
            tesseract_psm: 3,
            vision: VisionOcrConfig::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("chunk_height", &self.chunk_height)
            .field("overlap", &self.overlap)
            .field("viewport", &self.viewport)
            .field("load_settle_ms", &self.load_settle_ms)
            .field("resize_settle_ms", &self.resize_settle_ms)
            .field("navigation_timeout_secs", &self.navigation_timeout_secs)
            .field("pipeline_timeout_secs", &self.pipeline_timeout_secs)
            .field("max_document_height", &self.max_document_height)
            .field("browser_path", &self.browser_path)
            .field("browser_ws_url", &self.browser_ws_url)
            .field("browser_debug_port", &self.browser_debug_port)
            .field("ocr_engine", &self.ocr_engine)
            .field(
                "extractor",
                &self.extractor.as_ref().map(|e| e.name().to_string()),
            )
            .field("concurrency", &self.concurrency)
            .field("tesseract_lang", &self.tesseract_lang)
            .field("tesseract_psm", &self.tesseract_psm)
            .field("vision", &self.vision)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn chunk_height(mut self, px: u32) -> Self {
        self.config.chunk_height = px;
        self
    }

    pub fn overlap(mut self, px: u32) -> Self {
        self.config.overlap = px;
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.viewport = ViewportPolicy {
            width: width.max(1),
            height: height.max(1),
        };
        self
    }

    pub fn load_settle_ms(mut self, ms: u64) -> Self {
        self.config.load_settle_ms = ms;
        self
    }

    pub fn resize_settle_ms(mut self, ms: u64) -> Self {
        self.config.resize_settle_ms = ms;
        self
    }

    pub fn navigation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.navigation_timeout_secs = secs.max(1);
        self
    }

    pub fn pipeline_timeout_secs(mut self, secs: u64) -> Self {
        self.config.pipeline_timeout_secs = secs.max(1);
        self
    }

    pub fn max_document_height(mut self, px: u32) -> Self {
        self.config.max_document_height = px.max(1);
        self
    }

    pub fn browser_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.browser_path = Some(path.into());
        self
    }

    pub fn browser_ws_url(mut self, url: impl Into<String>) -> Self {
        self.config.browser_ws_url = Some(url.into());
        self
    }

    pub fn browser_debug_port(mut self, port: u16) -> Self {
        self.config.browser_debug_port = Some(port);
        self
    }

    pub fn ocr_engine(mut self, kind: OcrEngineKind) -> Self {
        self.config.ocr_engine = kind;
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs.max(1);
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_path = Some(path.into());
        self
    }

    pub fn tesseract_lang(mut self, lang: impl Into<String>) -> Self {
        self.config.tesseract_lang = lang.into();
        self
    }

    pub fn tesseract_psm(mut self, psm: u8) -> Self {
        self.config.tesseract_psm = psm.min(13);
        self
    }

    pub fn vision(mut self, vision: VisionOcrConfig) -> Self {
        self.config.vision = vision;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Web2CsvError> {
        let c = &self.config;
        crate::pipeline::tile::validate_tiling(c.chunk_height, c.overlap)?;
        if c.concurrency == 0 {
            return Err(Web2CsvError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.tesseract_lang.trim().is_empty() {
            return Err(Web2CsvError::InvalidConfig(
                "Tesseract language must not be empty".into(),
            ));
        }
        if c.browser_ws_url.is_some() && c.browser_debug_port.is_some() {
            return Err(Web2CsvError::InvalidConfig(
                "Set either a browser WebSocket URL or a debug port, not both".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Initial browser window used before the page is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportPolicy {
    pub width: u32,
    pub height: u32,
}

impl Default for ViewportPolicy {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Which OCR engine reads the bands.
///
/// | Engine | Setup | Accuracy on noisy renders |
/// |--------|-------|---------------------------|
/// | `Tesseract` | none (binary on `PATH`) | good on clean text |
/// | `Vision` | provider resolved once per process | better, but slower and billed |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OcrEngineKind {
    /// Classical OCR via the `tesseract` command-line tool. (default)
    #[default]
    Tesseract,
    /// Neural OCR via a vision-capable LLM.
    Vision,
}

impl OcrEngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrEngineKind::Tesseract => "tesseract",
            OcrEngineKind::Vision => "vision",
        }
    }
}

impl fmt::Display for OcrEngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for the vision-model OCR engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionOcrConfig {
    /// Model identifier; `None` uses [`DEFAULT_MODEL`].
    pub model: Option<String>,
    /// Provider name (`"openai"`, `"anthropic"`, …); `None` auto-detects.
    pub provider_name: Option<String>,
    /// Sampling temperature. Default: 0.0 (transcription, not creativity).
    pub temperature: f32,
    /// Maximum tokens per band transcription. Default: 4096.
    pub max_tokens: usize,
    /// Retries on a transient provider failure. Default: 3.
    pub max_retries: u32,
    /// Initial backoff in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,
}

impl Default for VisionOcrConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

// ── Structuring ──────────────────────────────────────────────────────────

/// Configuration for the "structure" operation.
#[derive(Clone)]
pub struct StructuringConfig {
    /// LLM model identifier; `None` uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Cleaning OCR noise into a table is a faithful-transcription task; a
    /// low temperature keeps the model from inventing rows.
    pub temperature: f32,

    /// Maximum tokens of CSV the model may produce. Default: 2000.
    pub max_tokens: usize,

    /// Retries on a transient provider failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 2000,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for StructuringConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuringConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl StructuringConfig {
    /// Create a new builder for `StructuringConfig`.
    pub fn builder() -> StructuringConfigBuilder {
        StructuringConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`StructuringConfig`].
#[derive(Debug)]
pub struct StructuringConfigBuilder {
    config: StructuringConfig,
}

impl StructuringConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<StructuringConfig, Web2CsvError> {
        if self.config.max_tokens == 0 {
            return Err(Web2CsvError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
