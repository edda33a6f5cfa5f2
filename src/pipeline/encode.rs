//! Image encoding: `DynamicImage` → PNG bytes → base64 `ImageData`.
//!
//! PNG is used everywhere because it is lossless: JPEG ringing around
//! small rendered glyphs measurably hurts both Tesseract and vision models.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap PNG bytes as a base64 attachment for a vision model.
///
/// `detail: "high"` asks GPT-4-class models for the full tile budget; a
/// 1920 px wide band read at low detail loses most small print.
pub fn png_to_image_data(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded band → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}
