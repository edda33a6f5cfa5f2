//! Integration tests for the extract → structure pipeline.
//!
//! No browser, OCR binary or API key is needed: the renderer, the OCR engine
//! and the structurer are replaced by hand-written stand-ins.
//!
//! The stand-in page encodes each pixel row's `y` in its colour
//! (`R = y >> 8`, `G = y & 0xff`), so the stand-in OCR engine can tell from
//! the band image alone which rows it was given.

use async_trait::async_trait;
use edgequake_web2csv::pipeline::ocr::is_engine_initialised;
use edgequake_web2csv::{
    aggregate, extract_with, persist, shared_engine, structure_with, teardown_engines,
    ExtractionConfig, OcrEngineKind, OcrError, PageRenderer, PipelineProgressCallback,
    RenderedPage, StructuringReply, StructuringRequest, TableStructurer, TextExtractor,
    Web2CsvError,
};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use reqwest::Url;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Stand-ins ────────────────────────────────────────────────────────────────

fn striped_page(width: u32, height: u32) -> RenderedPage {
    let img = RgbaImage::from_fn(width, height, |_, y| {
        Rgba([(y >> 8) as u8, (y & 0xff) as u8, 0, 255])
    });
    RenderedPage::new(DynamicImage::ImageRgba8(img))
}

fn row_of(img: &DynamicImage, y: u32) -> u32 {
    let px = img.get_pixel(0, y);
    ((px[0] as u32) << 8) | px[1] as u32
}

/// Renders the same in-memory page for every URL.
struct StaticRenderer {
    page: RenderedPage,
    calls: AtomicUsize,
}

impl StaticRenderer {
    fn new(height: u32) -> Self {
        Self {
            page: striped_page(16, height),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PageRenderer for StaticRenderer {
    async fn render(&self, _url: &Url) -> Result<RenderedPage, Web2CsvError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.page.clone())
    }
}

/// Fails like a page that never loads.
struct BrokenRenderer;

#[async_trait]
impl PageRenderer for BrokenRenderer {
    async fn render(&self, url: &Url) -> Result<RenderedPage, Web2CsvError> {
        Err(Web2CsvError::RenderFailed {
            url: url.to_string(),
            detail: "net::ERR_NAME_NOT_RESOLVED".into(),
        })
    }
}

/// Never finishes loading.
struct HangingRenderer;

#[async_trait]
impl PageRenderer for HangingRenderer {
    async fn render(&self, _url: &Url) -> Result<RenderedPage, Web2CsvError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(striped_page(4, 4))
    }
}

/// "Reads" the rows a band covers. Bands further down the page answer
/// sooner, so completion order is the reverse of band order.
struct RowReader {
    fail_at_row: Option<u32>,
    calls: AtomicUsize,
}

impl RowReader {
    fn new() -> Self {
        Self {
            fail_at_row: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_at(row: u32) -> Self {
        Self {
            fail_at_row: Some(row),
            ..Self::new()
        }
    }
}

#[async_trait]
impl TextExtractor for RowReader {
    fn name(&self) -> &str {
        "row-reader"
    }

    async fn extract(&self, png: &[u8]) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let img = image::load_from_memory(png).map_err(|e| OcrError::Engine(e.to_string()))?;
        let y_start = row_of(&img, 0);
        let y_end = row_of(&img, img.height() - 1) + 1;

        let delay = 200u64.saturating_sub(u64::from(y_start) / 10);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if Some(y_start) == self.fail_at_row {
            return Err(OcrError::Engine("unreadable band".into()));
        }
        Ok(format!("  rows {y_start}-{y_end}\r\n"))
    }
}

/// Takes far longer per band than any pipeline deadline used here.
struct StalledReader;

#[async_trait]
impl TextExtractor for StalledReader {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn extract(&self, _png: &[u8]) -> Result<String, OcrError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok("too late".into())
    }
}

#[derive(Default)]
struct Recorder {
    rendered: Mutex<Option<(u32, u32)>>,
    started: AtomicUsize,
    completed: AtomicUsize,
    errors: Mutex<Vec<(usize, String)>>,
    finished: Mutex<Option<(usize, usize)>>,
}

impl PipelineProgressCallback for Recorder {
    fn on_render_complete(&self, width: u32, height: u32) {
        *self.rendered.lock().unwrap() = Some((width, height));
    }
    fn on_band_start(&self, _index: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_band_complete(&self, _index: usize, _total: usize, _len: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_band_error(&self, index: usize, _total: usize, error: String) {
        self.errors.lock().unwrap().push((index, error));
    }
    fn on_extraction_complete(&self, total: usize, failed: usize) {
        *self.finished.lock().unwrap() = Some((total, failed));
    }
}

/// Answers with a fixed CSV and keeps the request.
struct EchoStructurer {
    reply: Option<&'static str>,
    seen: Mutex<Vec<StructuringRequest>>,
}

#[async_trait]
impl TableStructurer for EchoStructurer {
    async fn structure(
        &self,
        request: &StructuringRequest,
    ) -> Result<Option<StructuringReply>, Web2CsvError> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(self.reply.map(|s| StructuringReply {
            content: s.to_string(),
            input_tokens: 120,
            output_tokens: 30,
        }))
    }
}

fn config() -> ExtractionConfig {
    ExtractionConfig::builder()
        .chunk_height(800)
        .overlap(50)
        .concurrency(4)
        .build()
        .unwrap()
}

const URL: &str = "https://shop.example.com/catalogue";

// ── Extraction ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn tall_page_yields_three_ordered_records() {
    let renderer = StaticRenderer::new(2000);
    let engine = Arc::new(RowReader::new());

    let out = extract_with(URL, &config(), &renderer, engine.clone())
        .await
        .unwrap();

    let spans: Vec<_> = out.records.iter().map(|r| (r.y_start, r.y_end)).collect();
    assert_eq!(spans, vec![(0, 800), (750, 1550), (1500, 2000)]);
    for (i, r) in out.records.iter().enumerate() {
        assert_eq!(r.index, i);
        assert_eq!(r.text, format!("rows {}-{}", r.y_start, r.y_end));
        assert_eq!(r.text_length, r.text.chars().count());
    }
    assert_eq!(out.url, URL);
    assert_eq!((out.page_width, out.page_height), (16, 2000));
    assert_eq!(out.stats.total_bands, 3);
    assert_eq!(out.stats.failed_bands, 0);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn short_page_is_one_band() {
    let out = extract_with(URL, &config(), &StaticRenderer::new(500), Arc::new(RowReader::new()))
        .await
        .unwrap();
    assert_eq!(out.records.len(), 1);
    assert_eq!((out.records[0].y_start, out.records[0].y_end), (0, 500));
}

#[tokio::test]
async fn empty_page_gives_no_records() {
    let engine = Arc::new(RowReader::new());
    let out = extract_with(URL, &config(), &StaticRenderer::new(0), engine.clone())
        .await
        .unwrap();
    assert!(out.records.is_empty());
    assert_eq!(out.stats.total_bands, 0);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn order_survives_any_concurrency() {
    for concurrency in [1, 2, 8] {
        let config = ExtractionConfig::builder()
            .chunk_height(100)
            .overlap(10)
            .concurrency(concurrency)
            .build()
            .unwrap();
        let out = extract_with(URL, &config, &StaticRenderer::new(1000), Arc::new(RowReader::new()))
            .await
            .unwrap();
        let indices: Vec<_> = out.records.iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..indices.len()).collect::<Vec<_>>());
        assert!(out.records.windows(2).all(|w| w[0].y_start < w[1].y_start));
        assert_eq!(out.records.last().unwrap().y_end, 1000);
    }
}

#[tokio::test]
async fn unreadable_band_becomes_empty_record() {
    let recorder = Arc::new(Recorder::default());
    let config = ExtractionConfig::builder()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    let out = extract_with(
        URL,
        &config,
        &StaticRenderer::new(2000),
        Arc::new(RowReader::failing_at(750)),
    )
    .await
    .unwrap();

    assert_eq!(out.records.len(), 3);
    assert_eq!(out.records[1].text, "");
    assert_eq!(out.records[1].text_length, 0);
    assert_eq!(out.records[0].text, "rows 0-800");
    assert_eq!(out.records[2].text, "rows 1500-2000");
    assert_eq!(out.stats.failed_bands, 1);
    assert_eq!(out.stats.empty_bands, 1);

    assert_eq!(*recorder.rendered.lock().unwrap(), Some((16, 2000)));
    assert_eq!(recorder.started.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.completed.load(Ordering::SeqCst), 2);
    let errors = recorder.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, 1);
    assert!(errors[0].1.contains("unreadable band"));
    assert_eq!(*recorder.finished.lock().unwrap(), Some((3, 1)));
}

#[tokio::test]
async fn render_failure_returns_no_records() {
    let engine = Arc::new(RowReader::new());
    let err = extract_with(URL, &config(), &BrokenRenderer, engine.clone())
        .await
        .unwrap_err();
    assert!(err.is_render_failure());
    assert!(err.to_string().contains("ERR_NAME_NOT_RESOLVED"));
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn render_deadline_is_a_render_failure() {
    let config = ExtractionConfig::builder()
        .pipeline_timeout_secs(1)
        .build()
        .unwrap();
    let err = extract_with(URL, &config, &HangingRenderer, Arc::new(RowReader::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, Web2CsvError::Timeout { ref stage, secs: 1 } if stage == "render"));
    assert!(err.is_render_failure());
}

#[tokio::test]
async fn deadline_during_band_reads_discards_all_records() {
    let config = ExtractionConfig::builder()
        .pipeline_timeout_secs(1)
        .build()
        .unwrap();
    let renderer = StaticRenderer::new(2000);
    let err = extract_with(URL, &config, &renderer, Arc::new(StalledReader))
        .await
        .unwrap_err();
    assert!(matches!(err, Web2CsvError::Timeout { ref stage, secs: 1 } if stage == "ocr"));
    assert!(!err.is_render_failure());
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_tiling_is_rejected_before_rendering() {
    let mut config = ExtractionConfig::default();
    config.chunk_height = 100;
    config.overlap = 100;

    let renderer = StaticRenderer::new(2000);
    let err = extract_with(URL, &config, &renderer, Arc::new(RowReader::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, Web2CsvError::InvalidTiling { chunk_height: 100, overlap: 100 }));
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn relative_url_is_rejected_before_rendering() {
    let renderer = StaticRenderer::new(2000);
    let err = extract_with("catalogue/page-2", &config(), &renderer, Arc::new(RowReader::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, Web2CsvError::InvalidUrl { .. }));
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn aggregate_runs_on_an_in_memory_page() {
    let page = striped_page(8, 1550);
    let engine = RowReader::new();
    let out = tokio_test::block_on(aggregate(URL, &page, &config(), &engine)).unwrap();
    assert_eq!(out.records.len(), 2);
    assert_eq!(out.records[1].text, "rows 750-1550");
}

// ── Engine registry ──────────────────────────────────────────────────────────

#[test]
fn engines_are_created_once_and_torn_down_explicitly() {
    let fake_tesseract = tempfile::NamedTempFile::new().unwrap();
    let config = ExtractionConfig::builder()
        .ocr_engine(OcrEngineKind::Tesseract)
        .tesseract_path(fake_tesseract.path())
        .build()
        .unwrap();

    teardown_engines();
    assert!(!is_engine_initialised(OcrEngineKind::Tesseract));

    let first = shared_engine(&config).unwrap();
    let second = shared_engine(&config).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name(), "tesseract");
    assert!(is_engine_initialised(OcrEngineKind::Tesseract));

    teardown_engines();
    assert!(!is_engine_initialised(OcrEngineKind::Tesseract));
    let third = shared_engine(&config).unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    teardown_engines();
}

// ── Extract → persist → structure ────────────────────────────────────────────

#[tokio::test]
async fn records_survive_a_round_trip_and_structure() {
    let out = extract_with(URL, &config(), &StaticRenderer::new(2000), Arc::new(RowReader::new()))
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("current_extraction.json");
    persist::save_records(&path, &out).await.unwrap();
    let loaded = persist::load_records(&path).await.unwrap();
    assert_eq!(loaded.records, out.records);

    let structurer = EchoStructurer {
        reply: Some("```csv\nstart,end\n0,800\n750,1550\n1500,2000\n```"),
        seen: Mutex::new(Vec::new()),
    };
    let table = structure_with(&structurer, &loaded.records, "row ranges", "start and end")
        .await
        .unwrap();

    assert_eq!(table.csv, "start,end\n0,800\n750,1550\n1500,2000\n");
    assert_eq!((table.row_count, table.column_count), (3, 2));
    assert_eq!((table.input_tokens, table.output_tokens), (120, 30));

    let seen = structurer.seen.lock().unwrap();
    let block = &seen[0].records_block;
    assert_eq!(block.matches("--- CHUNK SEPARATOR ---").count(), 2);
    let first = block.find("Chunk 0:").unwrap();
    let last = block.find("Chunk 2:").unwrap();
    assert!(first < last);
}

#[tokio::test]
async fn missing_table_is_a_retryable_failure() {
    let out = extract_with(URL, &config(), &StaticRenderer::new(900), Arc::new(RowReader::new()))
        .await
        .unwrap();
    let structurer = EchoStructurer {
        reply: None,
        seen: Mutex::new(Vec::new()),
    };
    let err = structure_with(&structurer, &out.records, "anything", "anything")
        .await
        .unwrap_err();
    assert!(matches!(err, Web2CsvError::StructuringFailed { .. }));
    assert!(err.is_retryable());
    // The records are untouched and can be structured again.
    assert_eq!(out.records.len(), 2);
}
