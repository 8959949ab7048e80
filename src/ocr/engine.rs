use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

use super::setup::{locate_tesseract, TesseractPaths};
use crate::error::OcrError;

/// Page segmentation strategy for one capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    /// Scattered words in a tight crop.
    Sparse,
    /// A uniform block of text, used for whole-page captures.
    Block,
}

/// Something that turns a preprocessed image into raw text.
///
/// Implementations run on the OCR worker thread and may block.
pub trait TextExtractor: Send {
    fn extract(&self, img: &GrayImage, mode: OcrMode) -> Result<String, OcrError>;
}

/// Drives the `tesseract` command-line engine.
pub struct TesseractEngine {
    explicit_path: Option<PathBuf>,
    language: String,
    psm_sparse: u8,
    psm_block: u8,
    located: Mutex<Option<TesseractPaths>>,
}

impl TesseractEngine {
    pub fn new(explicit_path: Option<PathBuf>, language: &str, psm_sparse: u8, psm_block: u8) -> Self {
        Self {
            explicit_path,
            language: language.to_string(),
            psm_sparse,
            psm_block,
            located: Mutex::new(None),
        }
    }

    /// Builds an engine from the automation settings.
    pub fn from_config(config: &crate::automation::AutomationConfig) -> Self {
        Self::new(
            config.tesseract_path.clone(),
            &config.language,
            config.psm_sparse,
            config.psm_block,
        )
    }

    pub fn psm_for(&self, mode: OcrMode) -> u8 {
        match mode {
            OcrMode::Sparse => self.psm_sparse,
            OcrMode::Block => self.psm_block,
        }
    }

    fn paths(&self) -> Result<TesseractPaths, OcrError> {
        let mut located = self
            .located
            .lock()
            .map_err(|_| OcrError::Runtime("tesseract path cache poisoned".to_string()))?;
        if let Some(paths) = located.as_ref() {
            return Ok(paths.clone());
        }
        let paths = locate_tesseract(self.explicit_path.as_deref(), &self.language)?;
        *located = Some(paths.clone());
        Ok(paths)
    }
}

impl TextExtractor for TesseractEngine {
    fn extract(&self, img: &GrayImage, mode: OcrMode) -> Result<String, OcrError> {
        let paths = self.paths()?;
        let psm = self.psm_for(mode);

        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")
            .map_err(|e| OcrError::Runtime(format!("temp file: {}", e)))?;
        img.save(temp_input.path())
            .map_err(|e| OcrError::Runtime(format!("failed to write OCR input: {}", e)))?;

        let mut cmd = Command::new(&paths.executable);
        cmd.arg(temp_input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(psm.to_string());
        if let Some(tessdata) = &paths.tessdata {
            cmd.arg("--tessdata-dir").arg(tessdata);
        }

        debug!("Running tesseract --psm {} on {}x{} image", psm, img.width(), img.height());

        let output = cmd.output().map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => OcrError::EngineUnavailable(
                format!("cannot launch {}: {}", paths.executable.display(), e),
            ),
            _ => OcrError::Runtime(e.to_string()),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Failed loading language") || stderr.contains("Error opening data file") {
                return Err(OcrError::EngineUnavailable(stderr.trim().to_string()));
            }
            return Err(OcrError::Runtime(format!("tesseract failed: {}", stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
