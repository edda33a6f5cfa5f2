//! Result types produced by the extract and structure operations.
//!
//! Everything here is plain data with `Serialize`/`Deserialize`, so an
//! [`ExtractionOutput`] can be written between the two operations and read
//! back later (see [`crate::persist`]); the core itself never does so.

use serde::{Deserialize, Serialize};

/// Text read from one band, tagged with the band's position on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRecord {
    /// 0-based band index; equals the record's position in the sequence.
    pub index: usize,
    /// First pixel row of the band (inclusive).
    pub y_start: u32,
    /// Last pixel row of the band (exclusive).
    pub y_end: u32,
    /// Extracted text; empty when the band was blank or unreadable.
    pub text: String,
    /// Number of characters in `text`.
    pub text_length: usize,
}

impl TextRecord {
    pub fn new(index: usize, y_start: u32, y_end: u32, text: String) -> Self {
        let text_length = text.chars().count();
        Self {
            index,
            y_start,
            y_end,
            text,
            text_length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Result of the "extract" operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// The URL that was rendered.
    pub url: String,
    /// Captured page width in pixels.
    pub page_width: u32,
    /// Captured page height in pixels.
    pub page_height: u32,
    /// One record per band, in band order.
    pub records: Vec<TextRecord>,
    /// Counters and timings.
    pub stats: ExtractionStats,
}

/// Counters and timings for one extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Bands produced by the tiler.
    pub total_bands: usize,
    /// Bands whose OCR call failed (their records carry empty text).
    pub failed_bands: usize,
    /// Bands that ended with empty text, failed or not.
    pub empty_bands: usize,
    /// Characters across all records.
    pub total_chars: usize,
    pub render_duration_ms: u64,
    pub ocr_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of the "structure" operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredOutput {
    /// Cleaned CSV text, ending with a single newline.
    pub csv: String,
    /// Data rows (lines after the header).
    pub row_count: usize,
    /// Columns in the header row.
    pub column_count: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_length_counts_characters_not_bytes() {
        let r = TextRecord::new(0, 0, 800, "Zürich €5".to_string());
        assert_eq!(r.text_length, 9);
        assert!(!r.is_empty());
    }

    #[test]
    fn empty_record() {
        let r = TextRecord::new(3, 2250, 3050, String::new());
        assert_eq!(r.text_length, 0);
        assert!(r.is_empty());
    }

    #[test]
    fn extraction_output_serialises_records_in_order() {
        let out = ExtractionOutput {
            url: "https://example.com/".into(),
            page_width: 1280,
            page_height: 1550,
            records: vec![
                TextRecord::new(0, 0, 800, "a".into()),
                TextRecord::new(1, 750, 1550, "b".into()),
            ],
            stats: ExtractionStats::default(),
        };
        let json = serde_json::to_string(&out).expect("serialisable");
        let a = json.find("\"text\":\"a\"").expect("record 0 present");
        let b = json.find("\"text\":\"b\"").expect("record 1 present");
        assert!(a < b);
    }
}
