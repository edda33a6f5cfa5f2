//! Image tiling: slice a full-page capture into overlapping horizontal bands.
//!
//! Pages can be tens of thousands of pixels tall, far beyond what an OCR
//! engine reads well in one pass. The tiler cuts the capture into full-width
//! bands of at most `chunk_height` rows. Consecutive bands share `overlap`
//! rows so a line of text that straddles a cut is still whole in one of them.
//! The duplicated text at seams is passed through untouched.
//!
//! ```text
//!   y=0    ┌──────────┐
//!          │ band 0   │
//!   750    ├──────────┤ ┐ overlap
//!   800    │          │ ┘
//!          │ band 1   │
//!   1500   ├──────────┤ ┐ overlap
//!   1550   │          │ ┘
//!          │ band 2   │
//!   2000   └──────────┘  (last band ends exactly at the page height)
//! ```

use crate::error::Web2CsvError;
use crate::pipeline::encode;
use crate::pipeline::render::RenderedPage;
use image::DynamicImage;
use tracing::debug;

/// A horizontal slice of a rendered page.
#[derive(Debug, Clone)]
pub struct Band {
    /// 0-based position in capture order.
    pub index: usize,
    /// First pixel row (inclusive).
    pub y_start: u32,
    /// Last pixel row (exclusive).
    pub y_end: u32,
    /// Cropped raster, full page width.
    pub image: DynamicImage,
}

impl Band {
    pub fn height(&self) -> u32 {
        self.y_end - self.y_start
    }

    /// PNG-encode the band for an OCR engine.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        encode::encode_png(&self.image)
    }
}

/// Reject tiling parameters the loop cannot honour.
///
/// `overlap >= chunk_height` would never advance `y`.
pub fn validate_tiling(chunk_height: u32, overlap: u32) -> Result<(), Web2CsvError> {
    if chunk_height == 0 || overlap >= chunk_height {
        return Err(Web2CsvError::InvalidTiling {
            chunk_height,
            overlap,
        });
    }
    Ok(())
}

/// Compute the `[y_start, y_end)` rows of every band for a page of `height` rows.
///
/// Guarantees, for valid parameters:
/// - `height == 0` yields no bands;
/// - every band but the last is exactly `chunk_height` tall, none is taller;
/// - `band[i + 1].0 == band[i].1 - overlap`;
/// - the last band ends at `height`.
pub fn band_ranges(
    height: u32,
    chunk_height: u32,
    overlap: u32,
) -> Result<Vec<(u32, u32)>, Web2CsvError> {
    validate_tiling(chunk_height, overlap)?;

    if height == 0 {
        return Ok(Vec::new());
    }

    let step = chunk_height - overlap;
    let mut ranges = Vec::with_capacity((height / step) as usize + 1);
    let mut y = 0u32;
    loop {
        let y_end = y.saturating_add(chunk_height).min(height);
        ranges.push((y, y_end));
        if y_end == height {
            break;
        }
        y += step;
    }
    Ok(ranges)
}

/// Slice `page` into overlapping full-width bands.
pub fn tile(
    page: &RenderedPage,
    chunk_height: u32,
    overlap: u32,
) -> Result<Vec<Band>, Web2CsvError> {
    let ranges = band_ranges(page.height, chunk_height, overlap)?;
    debug!(
        "Tiling {}x{} px into {} bands (chunk={}, overlap={})",
        page.width,
        page.height,
        ranges.len(),
        chunk_height,
        overlap
    );

    Ok(ranges
        .into_iter()
        .enumerate()
        .map(|(index, (y_start, y_end))| Band {
            index,
            y_start,
            y_end,
            image: page.image.crop_imm(0, y_start, page.width, y_end - y_start),
        })
        .collect())
}
