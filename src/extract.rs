//! The "extract" operation: URL → full-page capture → bands → ordered records.
//!
//! [`extract`] is the production entry point (headless Chromium plus the
//! configured OCR engine). [`extract_with`] takes the renderer and engine
//! explicitly, and [`aggregate`] runs the tile/OCR half on a page that is
//! already in memory.
//!
//! Only a render failure, an invalid tiling configuration, an unavailable
//! OCR engine or the pipeline deadline produce `Err`. A band that cannot be
//! read yields a record with empty text. Nothing partial is ever returned:
//! on `Err` there are zero records.

use crate::config::ExtractionConfig;
use crate::error::Web2CsvError;
use crate::output::{ExtractionOutput, ExtractionStats, TextRecord};
use crate::persist;
use crate::pipeline::ocr::{self, BandOutcome, TextExtractor};
use crate::pipeline::render::{ChromeRenderer, PageRenderer, RenderedPage};
use crate::pipeline::tile::{self, Band};
use futures::stream::{self, StreamExt};
use reqwest::Url;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout_at, Duration};
use tracing::{debug, info};

/// Extract the text of a webpage as an ordered sequence of [`TextRecord`]s.
///
/// # Arguments
/// * `url` — absolute URL of the page
/// * `config` — extraction configuration
///
/// # Errors
/// - [`Web2CsvError::InvalidUrl`] / [`Web2CsvError::InvalidTiling`] before any work
/// - [`Web2CsvError::OcrEngineUnavailable`] when the engine cannot be set up
/// - a render failure (see [`Web2CsvError::is_render_failure`])
/// - [`Web2CsvError::Timeout`] when `pipeline_timeout_secs` expires
pub async fn extract(
    url: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Web2CsvError> {
    let url = parse_url(url.as_ref())?;
    tile::validate_tiling(config.chunk_height, config.overlap)?;

    let engine = ocr::shared_engine(config)?;
    let renderer = ChromeRenderer::new(config);
    extract_with(url.as_str(), config, &renderer, engine).await
}

/// [`extract`] with an explicit renderer and OCR engine.
pub async fn extract_with(
    url: &str,
    config: &ExtractionConfig,
    renderer: &dyn PageRenderer,
    engine: Arc<dyn TextExtractor>,
) -> Result<ExtractionOutput, Web2CsvError> {
    let total_start = Instant::now();
    let url = parse_url(url)?;
    tile::validate_tiling(config.chunk_height, config.overlap)?;
    info!("Starting extraction: {}", url);

    let budget = Duration::from_secs(config.pipeline_timeout_secs);
    let deadline = tokio::time::Instant::now() + budget;

    // ── Step 1: Render ───────────────────────────────────────────────────
    if let Some(ref cb) = config.progress_callback {
        cb.on_render_start(url.as_str());
    }
    let render_start = Instant::now();
    let page = timeout_at(deadline, renderer.render(&url))
        .await
        .map_err(|_| Web2CsvError::Timeout {
            stage: "render".into(),
            secs: budget.as_secs(),
        })??;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!(
        "Rendered {}x{} px in {}ms",
        page.width, page.height, render_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_render_complete(page.width, page.height);
    }

    // ── Step 2: Tile + OCR ───────────────────────────────────────────────
    let mut output = timeout_at(deadline, aggregate(url.as_str(), &page, config, engine.as_ref()))
        .await
        .map_err(|_| Web2CsvError::Timeout {
            stage: "ocr".into(),
            secs: budget.as_secs(),
        })??;

    output.stats.render_duration_ms = render_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Extraction complete: {} bands ({} failed, {} empty), {} chars, {}ms total",
        output.stats.total_bands,
        output.stats.failed_bands,
        output.stats.empty_bands,
        output.stats.total_chars,
        output.stats.total_duration_ms
    );
    Ok(output)
}

/// Tile `page` and read every band with `engine`.
///
/// Bands are read `config.concurrency` at a time and reassembled by index,
/// so `records[i].index == i` whatever order the reads complete in.
/// Overlapping text at band seams is passed through as-is.
pub async fn aggregate(
    url: &str,
    page: &RenderedPage,
    config: &ExtractionConfig,
    engine: &dyn TextExtractor,
) -> Result<ExtractionOutput, Web2CsvError> {
    let bands = tile::tile(page, config.chunk_height, config.overlap)?;
    let total = bands.len();
    info!("Reading {} bands with {}", total, engine.name());

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(total);
    }

    let ocr_start = Instant::now();
    let mut outcomes = read_bands(&bands, config, engine).await;
    outcomes.sort_by_key(|o| o.index);
    let ocr_duration_ms = ocr_start.elapsed().as_millis() as u64;

    let failed_bands = outcomes.iter().filter(|o| o.error.is_some()).count();
    let records: Vec<TextRecord> = bands
        .iter()
        .zip(outcomes)
        .map(|(band, outcome)| {
            debug_assert_eq!(band.index, outcome.index);
            TextRecord::new(band.index, band.y_start, band.y_end, outcome.text)
        })
        .collect();

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(total, failed_bands);
    }

    let stats = ExtractionStats {
        total_bands: total,
        failed_bands,
        empty_bands: records.iter().filter(|r| r.is_empty()).count(),
        total_chars: records.iter().map(|r| r.text_length).sum(),
        render_duration_ms: 0,
        ocr_duration_ms,
        total_duration_ms: ocr_duration_ms,
    };

    Ok(ExtractionOutput {
        url: url.to_string(),
        page_width: page.width,
        page_height: page.height,
        records,
        stats,
    })
}

/// Fan the bands out to the engine; results come back in completion order.
async fn read_bands(
    bands: &[Band],
    config: &ExtractionConfig,
    engine: &dyn TextExtractor,
) -> Vec<BandOutcome> {
    let total = bands.len();
    let band_timeout = Duration::from_secs(config.ocr_timeout_secs);

    stream::iter(bands.iter().map(move |band| async move {
        if let Some(ref cb) = config.progress_callback {
            cb.on_band_start(band.index, total);
        }
        let outcome = ocr::extract_band(engine, band, band_timeout).await;
        if let Some(ref cb) = config.progress_callback {
            match &outcome.error {
                None => cb.on_band_complete(band.index, total, outcome.text.chars().count()),
                Some(e) => cb.on_band_error(band.index, total, e.to_string()),
            }
        }
        debug!("Band {}/{} done", band.index + 1, total);
        outcome
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect()
    .await
}

/// Extract and write the records as JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    url: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionStats, Web2CsvError> {
    let output = extract(url, config).await?;
    persist::save_records(output_path, &output).await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    url: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Web2CsvError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Web2CsvError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(url, config))
}

/// Parse an absolute URL; nothing beyond syntax is checked.
pub fn parse_url(input: &str) -> Result<Url, Web2CsvError> {
    Url::parse(input.trim()).map_err(|e| Web2CsvError::InvalidUrl {
        url: input.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_urls_parse() {
        assert_eq!(
            parse_url(" https://example.com/list?page=2 ").unwrap().as_str(),
            "https://example.com/list?page=2"
        );
        assert!(parse_url("file:///tmp/page.html").is_ok());
    }

    #[test]
    fn relative_urls_are_rejected() {
        for bad in ["example.com", "/products", "", "http://"] {
            let err = parse_url(bad).unwrap_err();
            assert!(
                matches!(err, Web2CsvError::InvalidUrl { .. }),
                "{bad:?} gave {err:?}"
            );
        }
    }
}
