pub mod engine;
pub mod normalize;
pub mod preprocess;
pub mod setup;

pub use engine::{OcrMode, TesseractEngine, TextExtractor};
pub use normalize::{Normalizer, NO_USER};
pub use preprocess::preprocess;
pub use setup::locate_tesseract;

use image::RgbaImage;
use tracing::{debug, warn};

use crate::error::{AutomationError, OcrError};

/// Written to the field when a cycle could not derive any usable text.
pub const FAILURE_TOKEN: &str = "USERNAME_OCR_FAIL";

/// The value derived from one capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// Normalized text. Empty when the capture was rejected.
    Text(String),
    /// The sentinel failure marker.
    Failure,
}

impl Token {
    pub fn as_str(&self) -> &str {
        match self {
            Token::Text(s) => s,
            Token::Failure => FAILURE_TOKEN,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Token::Text(s) if s.is_empty())
    }

    /// What a running loop writes: empty tokens become the failure marker so
    /// every processed item carries something.
    pub fn or_failure(self) -> Token {
        if self.is_empty() { Token::Failure } else { self }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one capture → extract → normalize pass.
#[derive(Clone, Debug, PartialEq)]
pub struct OcrResult {
    pub raw_text: String,
    pub token: Token,
    /// Set when capture or extraction failed rather than finding no text.
    pub failure: Option<AutomationError>,
}

impl OcrResult {
    /// Result for a cycle whose capture failed.
    pub fn capture_failed(err: AutomationError) -> Self {
        Self {
            raw_text: String::new(),
            token: Token::Failure,
            failure: Some(err),
        }
    }
}

/// Runs the full OCR pipeline on a captured frame.
///
/// Never fails: an unavailable engine yields the failure token, any other
/// engine error is treated as "no text found".
pub fn ocr_capture(
    img: RgbaImage,
    mode: OcrMode,
    extractor: &dyn TextExtractor,
    normalizer: &Normalizer,
) -> OcrResult {
    let preprocessed = preprocess(img);

    match extractor.extract(&preprocessed, mode) {
        Ok(raw_text) => {
            let token = normalizer.normalize(&raw_text);
            debug!("OCR raw text {:?} -> token {:?}", raw_text, token);
            OcrResult {
                raw_text,
                token: Token::Text(token),
                failure: None,
            }
        }
        Err(e @ OcrError::EngineUnavailable(_)) => OcrResult {
            raw_text: String::new(),
            token: Token::Failure,
            failure: Some(e.into()),
        },
        Err(e @ OcrError::Runtime(_)) => {
            warn!("{}; treating as no text", e);
            OcrResult {
                raw_text: String::new(),
                token: Token::Text(normalizer.normalize("")),
                failure: Some(e.into()),
            }
        }
    }
}
