//! Band text extraction.
//!
//! Every engine implements [`TextExtractor`]: PNG bytes in, text out. Two
//! engines ship with the crate and are selected by
//! [`crate::config::OcrEngineKind`]:
//!
//! - [`tesseract::TesseractOcr`] — classical OCR through the `tesseract` CLI;
//! - [`vision::VisionOcr`] — neural OCR through a vision-capable LLM.
//!
//! Engines are created at most once per process and shared read-only by
//! every band and every extraction (see [`shared_engine`]); dropping them is
//! explicit ([`teardown_engines`]).
//!
//! [`extract_band`] is the only place engines are called from the pipeline.
//! It never fails: any error becomes empty text plus a [`BandError`].

pub mod tesseract;
pub mod vision;

use crate::config::{ExtractionConfig, OcrEngineKind};
use crate::error::{BandError, Web2CsvError};
use crate::pipeline::encode::encode_png;
use crate::pipeline::postprocess;
use crate::pipeline::tile::Band;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Errors raised by an engine for one image.
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    /// The engine ran and reported a failure.
    #[error("{0}")]
    Engine(String),

    /// The engine could not be started at all.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

/// The "text-from-image" capability.
///
/// `extract` must be a pure function of the image: no state may leak between
/// calls, because bands are read concurrently.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Short engine name used in logs and errors.
    fn name(&self) -> &str;

    /// Read all text in a PNG image.
    async fn extract(&self, png: &[u8]) -> Result<String, OcrError>;
}

/// Text read from one band, plus the failure if there was one.
#[derive(Debug, Clone)]
pub struct BandOutcome {
    pub index: usize,
    pub text: String,
    pub error: Option<BandError>,
}

/// PNG-encode a band on the blocking pool, off the runtime workers.
async fn encode_off_runtime(band: &Band) -> Result<Vec<u8>, String> {
    let image = band.image.clone();
    tokio::task::spawn_blocking(move || encode_png(&image))
        .await
        .map_err(|e| format!("encoder task failed: {e}"))?
        .map_err(|e| e.to_string())
}

/// Read one band, converting every failure into empty text.
pub async fn extract_band(
    engine: &dyn TextExtractor,
    band: &Band,
    timeout: Duration,
) -> BandOutcome {
    let index = band.index;
    let failed = |error: BandError| {
        warn!("{}", error);
        BandOutcome {
            index,
            text: String::new(),
            error: Some(error),
        }
    };

    let png = match encode_off_runtime(band).await {
        Ok(png) => png,
        Err(detail) => return failed(BandError::Encode { band: index, detail }),
    };

    match tokio::time::timeout(timeout, engine.extract(&png)).await {
        Ok(Ok(raw)) => {
            let text = postprocess::clean_ocr_text(&raw);
            debug!("Band {}: extracted {} characters", index, text.chars().count());
            BandOutcome {
                index,
                text,
                error: None,
            }
        }
        Ok(Err(e)) => failed(BandError::Engine {
            band: index,
            engine: engine.name().to_string(),
            detail: e.to_string(),
        }),
        Err(_) => failed(BandError::Timeout {
            band: index,
            secs: timeout.as_secs(),
        }),
    }
}

// ── Process-wide engine registry ─────────────────────────────────────────

static ENGINES: Lazy<Mutex<HashMap<OcrEngineKind, Arc<dyn TextExtractor>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// The engine for `config`, created on first use and shared afterwards.
///
/// A pre-built `config.extractor` bypasses the registry. Otherwise the first
/// call per [`OcrEngineKind`] initialises the engine from `config`; later
/// calls get the same instance regardless of their config, until
/// [`teardown_engines`] is called.
pub fn shared_engine(config: &ExtractionConfig) -> Result<Arc<dyn TextExtractor>, Web2CsvError> {
    if let Some(ref engine) = config.extractor {
        return Ok(Arc::clone(engine));
    }

    let kind = config.ocr_engine;
    let mut engines = ENGINES
        .lock()
        .map_err(|_| Web2CsvError::Internal("OCR engine registry poisoned".into()))?;

    if let Some(engine) = engines.get(&kind) {
        return Ok(Arc::clone(engine));
    }

    info!("Initialising {} OCR engine", kind);
    let engine: Arc<dyn TextExtractor> = match kind {
        OcrEngineKind::Tesseract => Arc::new(tesseract::TesseractOcr::from_config(config)?),
        OcrEngineKind::Vision => Arc::new(vision::VisionOcr::from_config(&config.vision)?),
    };
    engines.insert(kind, Arc::clone(&engine));
    Ok(engine)
}

/// Drop every shared engine. The next [`shared_engine`] call re-initialises.
///
/// Extractions already holding an engine keep it alive until they finish.
pub fn teardown_engines() {
    if let Ok(mut engines) = ENGINES.lock() {
        let n = engines.len();
        engines.clear();
        debug!("Released {} OCR engine(s)", n);
    }
}

/// `true` when an engine of `kind` is currently registered.
pub fn is_engine_initialised(kind: OcrEngineKind) -> bool {
    ENGINES
        .lock()
        .map(|engines| engines.contains_key(&kind))
        .unwrap_or(false)
}
