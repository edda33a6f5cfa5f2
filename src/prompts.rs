//! Prompts for structuring and vision OCR, plus the record-block rendering
//! the structuring model reads.
//!
//! Keeping every prompt here means changing default behaviour is a one-place
//! edit, and tests can inspect prompts without calling a model.
//!
//! Callers can override the structuring system prompt via
//! [`crate::config::StructuringConfig::system_prompt`].

use crate::output::TextRecord;

/// Default system prompt for the structuring model.
pub const STRUCTURING_SYSTEM_PROMPT: &str = "You are a data cleaning expert. Extract and structure meaningful data into clean CSV format based on user expectations.";

/// Separator placed between record sections in the text block.
pub const CHUNK_SEPARATOR: &str = "\n\n--- CHUNK SEPARATOR ---\n\n";

/// System prompt for the vision OCR engine: transcribe, do not interpret.
pub const VISION_OCR_PROMPT: &str = r#"You are an OCR engine. Transcribe ALL text visible in the image exactly as written.

Rules:
- Keep the reading order top-to-bottom, left-to-right
- Put each visual line of text on its own line
- Keep numbers, prices, dates and punctuation exactly as shown
- Do NOT describe images, icons or layout
- Do NOT add commentary, headings or Markdown formatting
- If the image contains no text, return nothing"#;

/// Render records as the delimited block sent to the structuring model.
///
/// One `Chunk {index}:` section per record in ascending index order, joined
/// by [`CHUNK_SEPARATOR`]. Empty records are kept so the model still sees
/// the full page sequence.
pub fn render_records_block(records: &[TextRecord]) -> String {
    let mut ordered: Vec<&TextRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.index);
    ordered
        .iter()
        .map(|r| format!("Chunk {}:\n{}", r.index, r.text))
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

/// Build the user message for the structuring model.
pub fn build_structuring_prompt(
    page_description: &str,
    expected_data: &str,
    records_block: &str,
) -> String {
    format!(
        "Please analyze the following text extracted from a webpage screenshot and structure it into a clean CSV format.

What the webpage contains: {page_description}
Expected data structure/output: {expected_data}

Instructions:
1. Clean up OCR errors and formatting issues
2. Identify the main data structure/table in the content based on the expected data description
3. Extract meaningful labels and organize into columns
4. Remove irrelevant navigation, ads, headers, footers, or junk text
5. Focus on the core data/content that matches the expected output
6. If there are multiple similar data entries, structure them as rows
7. Return ONLY the CSV content with appropriate headers

Text to analyze:
{records_block}

Please return only the clean CSV data with appropriate headers:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_ordered_and_separated() {
        let records = vec![
            TextRecord::new(1, 750, 1550, "second".into()),
            TextRecord::new(0, 0, 800, "first".into()),
            TextRecord::new(2, 1500, 2000, String::new()),
        ];
        let block = render_records_block(&records);
        assert_eq!(
            block,
            "Chunk 0:\nfirst\n\n--- CHUNK SEPARATOR ---\n\nChunk 1:\nsecond\n\n--- CHUNK SEPARATOR ---\n\nChunk 2:\n"
        );
    }

    #[test]
    fn empty_records_give_empty_block() {
        assert_eq!(render_records_block(&[]), "");
    }

    #[test]
    fn structuring_prompt_carries_hints_and_text() {
        let p = build_structuring_prompt("a product listing", "name, price", "Chunk 0:\nWidget $10");
        assert!(p.contains("What the webpage contains: a product listing"));
        assert!(p.contains("Expected data structure/output: name, price"));
        assert!(p.contains("7. Return ONLY the CSV content"));
        assert!(p.contains("Text to analyze:\nChunk 0:\nWidget $10"));
        assert!(p.ends_with("appropriate headers:"));
    }

    #[test]
    fn system_prompt_mentions_csv() {
        assert!(STRUCTURING_SYSTEM_PROMPT.contains("CSV"));
        assert!(VISION_OCR_PROMPT.contains("Transcribe"));
    }
}
