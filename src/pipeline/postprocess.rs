//! Post-processing: deterministic cleanup of OCR text and model-generated CSV.
//!
//! Two entry points share the same small rule set:
//!
//! - [`clean_ocr_text`] runs on every band's raw OCR output before it becomes
//!   a [`crate::output::TextRecord`];
//! - [`clean_csv`] runs on the structuring model's reply before it is
//!   returned as [`crate::output::StructuredOutput`].
//!
//! Models wrap their answer in ` ```csv ` fences despite the prompt, prepend
//! "Here is the CSV:" chatter, or emit Windows line endings. None of that is
//! content, and fixing it here keeps the prompt about *what* to extract.
//!
//! [`csv_census`] counts header columns and data rows without a CSV parser
//! (quotes are honoured, nothing else is validated).

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one band's OCR text.
///
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, …)
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of blank lines to one
/// 5. Trim the whole text
pub fn clean_ocr_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

/// Clean the structuring model's CSV reply.
///
/// 1. Extract the body of a ` ```csv ` (or bare ` ``` `) fence if present
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode
/// 4. Trim trailing whitespace per line
/// 5. Drop blank lines between records (blank lines inside a quoted field stay)
/// 6. Ensure the text ends with exactly one newline
///
/// Returns an empty string when nothing but whitespace remains.
pub fn clean_csv(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = extract_fenced_body(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = drop_blank_lines(&s);
    if s.trim().is_empty() {
        return String::new();
    }
    ensure_final_newline(&s)
}

/// `(data_rows, columns)` of a CSV text: columns are the header's field
/// count, rows are the non-header records.
///
/// A quoted field spanning several lines is one record.
pub fn csv_census(csv: &str) -> (usize, usize) {
    let records = csv_records(csv);
    match records.split_first() {
        Some((header, rows)) => (rows.len(), count_fields(header)),
        None => (0, 0),
    }
}

// ── Rule 1: Fenced body ─────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\n(.*?)\n?```").unwrap());

fn extract_fenced_body(input: &str) -> String {
    match RE_FENCE.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ──────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ───────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Blank lines ─────────────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

fn drop_blank_lines(input: &str) -> String {
    let mut in_quotes = false;
    let mut kept = Vec::new();
    for line in input.lines() {
        if in_quotes || !line.trim().is_empty() {
            kept.push(line);
        }
        in_quotes ^= opens_or_closes_quote(line);
    }
    kept.join("\n")
}

/// An odd number of `"` flips the quoted state; `""` escapes cancel out.
fn opens_or_closes_quote(line: &str) -> bool {
    line.matches('"').count() % 2 == 1
}

// ── Rule 6: Single final newline ────────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    format!("{}\n", input.trim_end())
}

// ── Census helpers ──────────────────────────────────────────────────────────

/// Logical records: blank lines outside quotes are skipped and lines of a
/// multi-line quoted field are joined back together.
fn csv_records(csv: &str) -> Vec<String> {
    let mut records = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for line in csv.lines() {
        if !in_quotes && line.trim().is_empty() {
            continue;
        }
        if in_quotes {
            current.push('\n');
        }
        current.push_str(line);
        in_quotes ^= opens_or_closes_quote(line);
        if !in_quotes {
            records.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        records.push(current);
    }
    records
}

/// Comma-separated field count, ignoring commas inside double quotes.
fn count_fields(line: &str) -> usize {
    let mut in_quotes = false;
    let mut fields = 1;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields += 1,
            _ => {}
        }
    }
    fields
}
