//! Page rendering: load a URL in a headless browser and capture the whole
//! document as one raster image.
//!
//! ## Capture sequence
//!
//! 1. navigate, then wait `load_settle_ms` for late scripts and images;
//! 2. measure the document (`body.offsetWidth` × `html.scrollHeight`);
//! 3. resize the emulated viewport to exactly that extent;
//! 4. wait `resize_settle_ms` so the page can reflow at the new size;
//! 5. capture one PNG covering the full extent.
//!
//! There is no retry: one failed load fails the render. The browser session
//! is released on every path (see [`crate::pipeline::browser`]).

use crate::config::ExtractionConfig;
use crate::error::Web2CsvError;
use crate::pipeline::browser::BrowserSession;
use crate::pipeline::cdp::CdpError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, GenericImageView, RgbaImage};
use reqwest::Url;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A full-page capture.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub width: u32,
    pub height: u32,
    pub image: DynamicImage,
}

impl RenderedPage {
    /// Wrap a decoded image; dimensions are taken from the image itself.
    pub fn new(image: DynamicImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            image,
        }
    }

    /// A zero-height page (blank document or empty capture).
    pub fn empty(width: u32) -> Self {
        Self {
            width,
            height: 0,
            image: DynamicImage::ImageRgba8(RgbaImage::new(width, 0)),
        }
    }

    /// Decode a PNG (or any format enabled on the `image` crate).
    pub fn from_png(bytes: &[u8]) -> Result<Self, image::ImageError> {
        Ok(Self::new(image::load_from_memory(bytes)?))
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0
    }
}

/// Anything that can turn a URL into a [`RenderedPage`].
///
/// [`ChromeRenderer`] is the production implementation; tests substitute
/// their own.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &Url) -> Result<RenderedPage, Web2CsvError>;
}

/// Renders pages with a headless Chromium-family browser over DevTools.
pub struct ChromeRenderer {
    config: ExtractionConfig,
}

impl ChromeRenderer {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &Url) -> Result<RenderedPage, Web2CsvError> {
        info!("Loading URL: {}", url);
        let mut session = BrowserSession::open(&self.config).await?;
        let result = capture(&mut session, url, &self.config).await;
        session.close().await;

        let page = result?;
        info!("Captured {}x{} px", page.width, page.height);
        Ok(page)
    }
}

/// Steps 1–5 of the capture sequence on an open session.
async fn capture(
    session: &mut BrowserSession,
    url: &Url,
    config: &ExtractionConfig,
) -> Result<RenderedPage, Web2CsvError> {
    let fail = |e: CdpError| Web2CsvError::RenderFailed {
        url: url.to_string(),
        detail: e.to_string(),
    };

    session.page_call("Page.enable", json!({})).await.map_err(fail)?;

    let nav = session
        .page_call("Page.navigate", json!({ "url": url.as_str() }))
        .await
        .map_err(fail)?;
    if let Some(err) = navigation_error(&nav) {
        return Err(Web2CsvError::RenderFailed {
            url: url.to_string(),
            detail: err,
        });
    }

    tokio::time::sleep(Duration::from_millis(config.load_settle_ms)).await;

    let width = evaluate_u32(session, "document.body ? document.body.offsetWidth : 0")
        .await
        .map_err(fail)?;
    let measured_height = evaluate_u32(
        session,
        "document.body && document.body.parentNode ? document.body.parentNode.scrollHeight : 0",
    )
    .await
    .map_err(fail)?;
    debug!("Document extent: {}x{}", width, measured_height);

    let width = if width == 0 { config.viewport.width } else { width };
    if measured_height == 0 {
        warn!("{} reports a zero-height document", url);
        return Ok(RenderedPage::empty(width));
    }

    let height = clamp_height(measured_height, config.max_document_height);
    if height < measured_height {
        warn!(
            "Document height {}px exceeds cap; capturing the first {}px",
            measured_height, height
        );
    }

    session
        .page_call(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
        )
        .await
        .map_err(fail)?;

    tokio::time::sleep(Duration::from_millis(config.resize_settle_ms)).await;

    let shot = session
        .page_call(
            "Page.captureScreenshot",
            json!({
                "format": "png",
                "captureBeyondViewport": true,
                "clip": { "x": 0, "y": 0, "width": width, "height": height, "scale": 1 },
            }),
        )
        .await
        .map_err(fail)?;

    let data = shot.get("data").and_then(Value::as_str).unwrap_or_default();
    if data.is_empty() {
        warn!("{} produced an empty capture", url);
        return Ok(RenderedPage::empty(width));
    }

    let png = STANDARD.decode(data).map_err(|e| Web2CsvError::RenderFailed {
        url: url.to_string(),
        detail: format!("screenshot is not valid base64: {e}"),
    })?;
    RenderedPage::from_png(&png).map_err(|e| Web2CsvError::RenderFailed {
        url: url.to_string(),
        detail: format!("screenshot could not be decoded: {e}"),
    })
}

/// Evaluate a numeric expression in the page.
async fn evaluate_u32(session: &mut BrowserSession, expression: &str) -> Result<u32, CdpError> {
    let result = session
        .page_call(
            "Runtime.evaluate",
            json!({ "expression": expression, "returnByValue": true }),
        )
        .await?;
    Ok(result
        .pointer("/result/value")
        .and_then(Value::as_f64)
        .map(|v| v.max(0.0).round() as u32)
        .unwrap_or(0))
}

/// `Page.navigate` reports DNS / TLS / connection failures in `errorText`.
fn navigation_error(result: &Value) -> Option<String> {
    result
        .get("errorText")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn clamp_height(measured: u32, cap: u32) -> u32 {
    measured.min(cap.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::encode_png;
    use image::Rgba;

    #[test]
    fn empty_page_has_zero_height() {
        let p = RenderedPage::empty(1280);
        assert_eq!(p.width, 1280);
        assert_eq!(p.height, 0);
        assert!(p.is_empty());
    }

    #[test]
    fn from_png_takes_dimensions_from_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(30, 70, Rgba([1, 2, 3, 255])));
        let png = encode_png(&img).unwrap();
        let page = RenderedPage::from_png(&png).unwrap();
        assert_eq!((page.width, page.height), (30, 70));
    }

    #[test]
    fn garbage_bytes_do_not_decode() {
        assert!(RenderedPage::from_png(b"not an image").is_err());
    }

    #[test]
    fn navigation_error_text_is_detected() {
        let failed = json!({"frameId": "F", "errorText": "net::ERR_NAME_NOT_RESOLVED"});
        assert_eq!(
            navigation_error(&failed).as_deref(),
            Some("net::ERR_NAME_NOT_RESOLVED")
        );
        assert_eq!(navigation_error(&json!({"frameId": "F"})), None);
        assert_eq!(navigation_error(&json!({"errorText": ""})), None);
    }

    #[test]
    fn height_is_capped() {
        assert_eq!(clamp_height(50_000, 32_000), 32_000);
        assert_eq!(clamp_height(2_000, 32_000), 2_000);
        assert_eq!(clamp_height(10, 0), 1);
    }
}
