//! Optional persistence of pipeline artefacts.
//!
//! The core passes data by value and never touches the disk. These helpers
//! let a caller keep the records between "extract" and "structure", or keep
//! the page capture and bands for inspection:
//!
//! ```text
//! out/
//! ├── records.json          save_records / load_records
//! ├── structured_data.csv   save_csv
//! └── screenshots/
//!     ├── full_page.png     save_page
//!     └── chunks/
//!         ├── chunk_000.png save_bands
//!         └── chunk_001.png
//! ```
//!
//! Every write is atomic: temp file in the destination directory, then rename.

use crate::error::Web2CsvError;
use crate::output::ExtractionOutput;
use crate::pipeline::encode::encode_png;
use crate::pipeline::render::RenderedPage;
use crate::pipeline::tile::Band;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Write the extraction output as pretty-printed JSON.
pub async fn save_records(
    path: impl AsRef<Path>,
    output: &ExtractionOutput,
) -> Result<(), Web2CsvError> {
    let path = path.as_ref();
    let json = serde_json::to_vec_pretty(output)
        .map_err(|e| Web2CsvError::Internal(format!("serialising records: {e}")))?;
    write_atomic(path, &json).await?;
    debug!("Saved {} records to {}", output.records.len(), path.display());
    Ok(())
}

/// Read an extraction output written by [`save_records`].
pub async fn load_records(path: impl AsRef<Path>) -> Result<ExtractionOutput, Web2CsvError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| persist_failed(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        persist_failed(
            path,
            io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
        )
    })
}

/// Write the CSV text.
pub async fn save_csv(path: impl AsRef<Path>, csv: &str) -> Result<(), Web2CsvError> {
    write_atomic(path.as_ref(), csv.as_bytes()).await
}

/// Write the full-page capture as PNG.
pub async fn save_page(path: impl AsRef<Path>, page: &RenderedPage) -> Result<(), Web2CsvError> {
    let path = path.as_ref();
    let png = encode_png(&page.image).map_err(|e| image_failed(path, e))?;
    write_atomic(path, &png).await
}

/// Write every band as `chunk_NNN.png` into `dir`; returns the paths in band order.
pub async fn save_bands(dir: impl AsRef<Path>, bands: &[Band]) -> Result<Vec<PathBuf>, Web2CsvError> {
    let dir = dir.as_ref();
    let mut paths = Vec::with_capacity(bands.len());
    for band in bands {
        let path = dir.join(band_file_name(band.index));
        let png = band.to_png().map_err(|e| image_failed(&path, e))?;
        write_atomic(&path, &png).await?;
        paths.push(path);
    }
    debug!("Saved {} bands to {}", paths.len(), dir.display());
    Ok(paths)
}

/// `chunk_000.png`, `chunk_001.png`, …
pub fn band_file_name(index: usize) -> String {
    format!("chunk_{index:03}.png")
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Web2CsvError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| persist_failed(path, e))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| persist_failed(path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| persist_failed(path, e))
}

fn persist_failed(path: &Path, source: io::Error) -> Web2CsvError {
    Web2CsvError::PersistFailed {
        path: path.to_path_buf(),
        source,
    }
}

fn image_failed(path: &Path, e: image::ImageError) -> Web2CsvError {
    persist_failed(path, io::Error::other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{ExtractionStats, TextRecord};
    use crate::pipeline::tile::tile;
    use image::{DynamicImage, RgbaImage};

    fn sample_output() -> ExtractionOutput {
        ExtractionOutput {
            url: "https://example.com/".into(),
            page_width: 100,
            page_height: 1550,
            records: vec![
                TextRecord::new(0, 0, 800, "Widget $10".into()),
                TextRecord::new(1, 750, 1550, String::new()),
            ],
            stats: ExtractionStats {
                total_bands: 2,
                failed_bands: 1,
                empty_bands: 1,
                total_chars: 10,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn records_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/records.json");
        save_records(&path, &sample_output()).await.unwrap();

        let loaded = load_records(&path).await.unwrap();
        assert_eq!(loaded.records, sample_output().records);
        assert_eq!(loaded.stats, sample_output().stats);
        assert!(!dir.path().join("nested/records.json.tmp").exists());
    }

    #[tokio::test]
    async fn loading_garbage_is_persist_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let err = load_records(&path).await.unwrap_err();
        assert!(matches!(err, Web2CsvError::PersistFailed { .. }));

        let missing = load_records(dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(missing, Web2CsvError::PersistFailed { .. }));
    }

    #[tokio::test]
    async fn bands_are_numbered_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let page = RenderedPage::new(DynamicImage::ImageRgba8(RgbaImage::new(10, 2000)));
        let bands = tile(&page, 800, 50).unwrap();

        let paths = save_bands(dir.path().join("chunks"), &bands).await.unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["chunk_000.png", "chunk_001.png", "chunk_002.png"]);

        let reread = RenderedPage::from_png(&std::fs::read(&paths[2]).unwrap()).unwrap();
        assert_eq!((reread.width, reread.height), (10, 500));
    }

    #[tokio::test]
    async fn csv_and_page_are_written() {
        let dir = tempfile::tempdir().unwrap();
        save_csv(dir.path().join("out.csv"), "a,b\n1,2\n").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.csv")).unwrap(),
            "a,b\n1,2\n"
        );

        let page = RenderedPage::new(DynamicImage::ImageRgba8(RgbaImage::new(4, 6)));
        save_page(dir.path().join("screenshots/full_page.png"), &page)
            .await
            .unwrap();
        assert!(dir.path().join("screenshots/full_page.png").exists());
    }
}
