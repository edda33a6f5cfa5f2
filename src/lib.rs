//! # edgequake-web2csv
//!
//! Turn a webpage into CSV: full-page screenshot, banded OCR, LLM structuring.
//!
//! ## Why this crate?
//!
//! Scrapers that walk the DOM break on canvas charts, shadow roots, lazy
//! widgets and obfuscated markup. This crate reads the page the way a person
//! does instead: it renders it in a headless browser, photographs the whole
//! document, reads the pixels with OCR, and lets an LLM turn the noisy text
//! into a clean table described in plain words.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL
//!  │
//!  ├─ 1. Render     headless Chromium over DevTools, full-document capture
//!  ├─ 2. Tile       overlapping 800 px bands (50 px overlap by default)
//!  ├─ 3. OCR        tesseract or a vision LLM, bands read concurrently
//!  ├─ 4. Aggregate  ordered TextRecords (the "extract" result)
//!  └─ 5. Structure  LLM + two free-text hints → CSV (the "structure" result)
//! ```
//!
//! "extract" and "structure" are separate operations: keep the records (see
//! [`persist`]) and structure them as many times as needed with other hints.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_web2csv::{extract, structure, ExtractionConfig, StructuringConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let extraction = extract("https://example.com/products", &ExtractionConfig::default()).await?;
//!     eprintln!("{} bands, {} chars", extraction.stats.total_bands, extraction.stats.total_chars);
//!
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let table = structure(
//!         &extraction.records,
//!         "product listings",
//!         "table with product name, price and rating",
//!         &StructuringConfig::default(),
//!     )
//!     .await?;
//!     print!("{}", table.csv);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `web2csv` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-web2csv = { version = "0.1", default-features = false }
//! ```
//!
//! ## External Tools
//!
//! | Tool | Needed for | Lookup |
//! |------|------------|--------|
//! | Chromium / Chrome | rendering | `browser_path` → `CHROME_PATH` → `PATH` |
//! | `tesseract` | classical OCR (default engine) | `tesseract_path` → `PATH` |
//! | LLM API key | structuring, vision OCR | provider auto-detection |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod structure;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ExtractionConfig, ExtractionConfigBuilder, OcrEngineKind, StructuringConfig,
    StructuringConfigBuilder, ViewportPolicy, VisionOcrConfig,
};
pub use error::{BandError, Web2CsvError};
pub use extract::{aggregate, extract, extract_sync, extract_to_file, extract_with};
pub use output::{ExtractionOutput, ExtractionStats, StructuredOutput, TextRecord};
pub use pipeline::ocr::{shared_engine, teardown_engines, OcrError, TextExtractor};
pub use pipeline::render::{ChromeRenderer, PageRenderer, RenderedPage};
pub use pipeline::tile::{band_ranges, tile, Band};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use structure::{
    structure, structure_sync, structure_with, LlmStructurer, StructuringReply,
    StructuringRequest, TableStructurer,
};
