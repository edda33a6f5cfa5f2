//! Classical OCR through the `tesseract` command-line tool.
//!
//! The band PNG is piped to `tesseract stdin stdout -l <lang> --psm <psm>`
//! and the recognised text is read from stdout. One short-lived process per
//! band keeps calls independent; the process is killed if the call is
//! cancelled (timeout or pipeline deadline).

use super::{OcrError, TextExtractor};
use crate::config::ExtractionConfig;
use crate::error::Web2CsvError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// `tesseract` CLI wrapper.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    exe: PathBuf,
    lang: String,
    psm: u8,
}

impl TesseractOcr {
    /// Locate the executable and capture the language / segmentation settings.
    ///
    /// Fails with [`Web2CsvError::OcrEngineUnavailable`] when no executable
    /// can be found, before any band is processed.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, Web2CsvError> {
        let exe = match config.tesseract_path {
            Some(ref p) => p.clone(),
            None => which::which("tesseract").map_err(|_| Web2CsvError::OcrEngineUnavailable {
                engine: "tesseract".into(),
                hint: "tesseract was not found on PATH.\n\
                       Install it (apt install tesseract-ocr / brew install tesseract)\n\
                       or select the vision engine with --engine vision."
                    .into(),
            })?,
        };
        if !exe.exists() {
            return Err(Web2CsvError::OcrEngineUnavailable {
                engine: "tesseract".into(),
                hint: format!("{} does not exist", exe.display()),
            });
        }
        debug!("Using tesseract at {}", exe.display());
        Ok(Self {
            exe,
            lang: config.tesseract_lang.clone(),
            psm: config.tesseract_psm,
        })
    }

    fn args(&self) -> Vec<String> {
        vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            self.lang.clone(),
            "--psm".to_string(),
            self.psm.to_string(),
        ]
    }
}

#[async_trait]
impl TextExtractor for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn extract(&self, png: &[u8]) -> Result<String, OcrError> {
        let mut child = Command::new(&self.exe)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::Unavailable(format!("{}: {}", self.exe.display(), e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OcrError::Engine("stdin not captured".into()))?;
        let image = png.to_vec();
        // Write concurrently with reading stdout so large images cannot deadlock.
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&image).await;
            drop(stdin);
            result
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OcrError::Engine(e.to_string()))?;

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(OcrError::Engine(format!("writing image: {e}"))),
            Err(e) => return Err(OcrError::Engine(format!("writer task: {e}"))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_follow_cli_contract() {
        let ocr = TesseractOcr {
            exe: PathBuf::from("/usr/bin/tesseract"),
            lang: "eng+deu".into(),
            psm: 6,
        };
        assert_eq!(
            ocr.args(),
            vec!["stdin", "stdout", "-l", "eng+deu", "--psm", "6"]
        );
    }

    #[test]
    fn missing_explicit_binary_is_unavailable() {
        let config = ExtractionConfig::builder()
            .tesseract_path("/definitely/not/here/tesseract")
            .build()
            .unwrap();
        let err = TesseractOcr::from_config(&config).unwrap_err();
        assert!(matches!(err, Web2CsvError::OcrEngineUnavailable { .. }));
    }
}
