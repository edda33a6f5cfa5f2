//! Error types for the edgequake-web2csv library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Web2CsvError`] — **Surfaced**: the operation cannot produce its result
//!   (page would not render, bad tiling parameters, OCR engine missing, the
//!   structuring model returned nothing usable). Returned as
//!   `Err(Web2CsvError)` from [`crate::extract()`] and [`crate::structure()`].
//!
//! * [`BandError`] — **Non-fatal**: a single band could not be read. The band
//!   still yields a [`crate::output::TextRecord`] with empty text; the error
//!   only travels through logs, [`crate::output::ExtractionStats`] and the
//!   progress callback.
//!
//! Only render failures and tiling-precondition violations abort an extraction.
//! A structuring failure is surfaced to the caller but leaves the process (and
//! the extracted records) intact, so the caller can retry with other hints.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-web2csv library.
///
/// Band-level failures use [`BandError`] and never propagate here.
#[derive(Debug, Error)]
pub enum Web2CsvError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input string is not a syntactically valid absolute URL.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    // ── Render errors ─────────────────────────────────────────────────────
    /// The page could not be loaded or captured (network error, browser
    /// crash, protocol error, undecodable screenshot).
    #[error("Failed to render '{url}': {detail}")]
    RenderFailed { url: String, detail: String },

    /// No headless browser executable could be found or reached.
    #[error("No headless browser available.\n{hint}")]
    BrowserNotFound { hint: String },

    // ── Tiling errors ─────────────────────────────────────────────────────
    /// `chunk_height` must be positive and `overlap` strictly smaller.
    #[error(
        "Invalid tiling: chunk_height={chunk_height}, overlap={overlap} \
(need chunk_height > 0 and overlap < chunk_height)"
    )]
    InvalidTiling { chunk_height: u32, overlap: u32 },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The selected OCR engine could not be initialised.
    #[error("OCR engine '{engine}' is unavailable.\n{hint}")]
    OcrEngineUnavailable { engine: String, hint: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The structuring model returned no usable table.
    ///
    /// Not fatal to the process: the extracted records are untouched and the
    /// caller may retry, typically with more specific hints.
    #[error("Structuring produced no usable result: {reason}")]
    StructuringFailed { reason: String },

    // ── Cancellation ──────────────────────────────────────────────────────
    /// A stage exceeded its deadline and was abandoned.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: String, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read or write a persisted artefact.
    #[error("Failed to persist '{path}': {source}")]
    PersistFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Web2CsvError {
    /// `true` for every flavour of RenderFailure.
    pub fn is_render_failure(&self) -> bool {
        matches!(
            self,
            Web2CsvError::RenderFailed { .. } | Web2CsvError::BrowserNotFound { .. }
        ) || matches!(self, Web2CsvError::Timeout { stage, .. } if stage == "render")
    }

    /// `true` when calling again (possibly with other inputs) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Web2CsvError::StructuringFailed { .. }
                | Web2CsvError::Timeout { .. }
                | Web2CsvError::RenderFailed { .. }
        )
    }
}

/// A non-fatal error for a single band.
///
/// Reported, never raised: the band's record carries empty text instead.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum BandError {
    /// The cropped band could not be encoded for the engine.
    #[error("Band {band}: encoding failed: {detail}")]
    Encode { band: usize, detail: String },

    /// The OCR engine reported a failure.
    #[error("Band {band}: {engine} failed: {detail}")]
    Engine {
        band: usize,
        engine: String,
        detail: String,
    },

    /// The OCR call did not finish in time.
    #[error("Band {band}: OCR timed out after {secs}s")]
    Timeout { band: usize, secs: u64 },
}

impl BandError {
    /// Index of the band this error belongs to.
    pub fn band(&self) -> usize {
        match self {
            BandError::Encode { band, .. }
            | BandError::Engine { band, .. }
            | BandError::Timeout { band, .. } => *band,
        }
    }
}
