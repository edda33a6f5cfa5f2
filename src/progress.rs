//! Progress-callback trait for render and per-band extraction events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline renders the page and reads each band. This is also
//! the side channel through which band-level OCR failures are reported: they
//! never surface as errors, only as [`PipelineProgressCallback::on_band_error`].
//!
//! # Example
//!
//! ```rust
//! use edgequake_web2csv::{ExtractionConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_band_complete(&self, index: usize, total_bands: usize, text_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Band {}/{} done ({} chars)", index + 1, total_bands, text_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it renders and reads bands.
///
/// Implementations must be `Send + Sync`: bands are read concurrently, so
/// the band methods may be called from several tasks at once. All methods
/// default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called before the browser loads `url`.
    fn on_render_start(&self, url: &str) {
        let _ = url;
    }

    /// Called once the full-page capture is decoded.
    fn on_render_complete(&self, width: u32, height: u32) {
        let _ = (width, height);
    }

    /// Called once the page is tiled, before any OCR call.
    fn on_extraction_start(&self, total_bands: usize) {
        let _ = total_bands;
    }

    /// Called just before a band is handed to the OCR engine.
    ///
    /// `index` is the 0-based band index.
    fn on_band_start(&self, index: usize, total_bands: usize) {
        let _ = (index, total_bands);
    }

    /// Called when a band was read; `text_len` is in characters.
    fn on_band_complete(&self, index: usize, total_bands: usize, text_len: usize) {
        let _ = (index, total_bands, text_len);
    }

    /// Called when a band could not be read; its record will carry empty text.
    ///
    /// `error` is owned so implementations can move it into spawned tasks.
    fn on_band_error(&self, index: usize, total_bands: usize, error: String) {
        let _ = (index, total_bands, error);
    }

    /// Called once after every band has been attempted.
    fn on_extraction_complete(&self, total_bands: usize, failed_bands: usize) {
        let _ = (total_bands, failed_bands);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: Mutex<Vec<String>>,
        rendered: Mutex<Option<(u32, u32)>>,
        failed_total: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_render_complete(&self, width: u32, height: u32) {
            *self.rendered.lock().unwrap() = Some((width, height));
        }

        fn on_band_start(&self, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_band_complete(&self, _index: usize, _total: usize, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_band_error(&self, _index: usize, _total: usize, error: String) {
            self.errors.lock().unwrap().push(error);
        }

        fn on_extraction_complete(&self, _total: usize, failed: usize) {
            self.failed_total.store(failed, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_render_start("https://example.com");
        cb.on_render_complete(1280, 4000);
        cb.on_extraction_start(5);
        cb.on_band_start(0, 5);
        cb.on_band_complete(0, 5, 42);
        cb.on_band_error(1, 5, "tesseract exited with 1".to_string());
        cb.on_extraction_complete(5, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_render_complete(1024, 2000);
        tracker.on_band_start(0, 3);
        tracker.on_band_complete(0, 3, 100);
        tracker.on_band_start(1, 3);
        tracker.on_band_complete(1, 3, 80);
        tracker.on_band_start(2, 3);
        tracker.on_band_error(2, 3, "OCR timeout".to_string());
        tracker.on_extraction_complete(3, 1);

        assert_eq!(*tracker.rendered.lock().unwrap(), Some((1024, 2000)));
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(*tracker.errors.lock().unwrap(), vec!["OCR timeout"]);
        assert_eq!(tracker.failed_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn arc_dyn_callback_moves_into_spawned_task() {
        let cb: Arc<dyn PipelineProgressCallback> = Arc::new(NoopProgressCallback);
        tokio::spawn(async move {
            cb.on_band_error(2, 5, "timeout".to_string());
        })
        .await
        .expect("spawn must succeed");
    }
}
