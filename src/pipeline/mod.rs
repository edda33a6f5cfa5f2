//! Pipeline stages for webpage-to-CSV extraction.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable and the browser or OCR backend can be swapped
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! URL ──▶ render ──▶ tile ──▶ ocr (per band) ──▶ postprocess
//!        (browser)  (bands)  (tesseract/vision)   (cleanup)
//! ```
//!
//! 1. [`render`] — load the URL in a headless browser ([`browser`] over
//!    [`cdp`]) and capture the whole document as one image
//! 2. [`tile`]   — slice the capture into overlapping full-width bands
//! 3. [`encode`] — PNG-encode bands; base64-wrap them for vision models
//! 4. [`ocr`]    — read each band; failures become empty text
//! 5. [`llm`]    — provider resolution and retrying chat calls, shared by
//!    the vision engine and the structuring client
//! 6. [`postprocess`] — deterministic cleanup of OCR text and model CSV

pub mod browser;
pub mod cdp;
pub mod encode;
pub mod llm;
pub mod ocr;
pub mod postprocess;
pub mod render;
pub mod tile;
