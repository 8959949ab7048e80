//! Error taxonomy for the automation loop.
//!
//! Only `InvalidRegion` and `PageNotLoaded` ever stop a loop from starting.
//! Everything raised inside a running cycle is recovered locally and turned
//! into the failure-token path.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutomationError {
    #[error("Capture failed: {0}")]
    CaptureFailure(String),

    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("OCR runtime error: {0}")]
    OcrRuntime(String),

    #[error("Target field not found: {0}")]
    FieldNotFound(String),

    #[error("Invalid capture region: {0}")]
    InvalidRegion(String),

    #[error("Host page has not loaded")]
    PageNotLoaded,

    #[error("Page script failed: {0}")]
    Script(String),

    #[error("Automation loop is already running")]
    AlreadyRunning,

    #[error("An injection is already in flight")]
    InjectionInFlight,

    #[error("Controller is busy: {0}")]
    Busy(String),

    #[error("No OCR text to write")]
    NothingToInject,

    #[error("Loop controller has shut down")]
    ControllerClosed,
}

impl AutomationError {
    /// Whether this error prevents the loop from starting at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AutomationError::InvalidRegion(_) | AutomationError::PageNotLoaded
        )
    }
}

/// Errors produced by a text extractor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OcrError {
    /// The OCR engine could not be located or launched.
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine ran but failed on this image.
    #[error("OCR failed: {0}")]
    Runtime(String),
}

impl From<OcrError> for AutomationError {
    fn from(e: OcrError) -> Self {
        match e {
            OcrError::EngineUnavailable(msg) => AutomationError::EngineUnavailable(msg),
            OcrError::Runtime(msg) => AutomationError::OcrRuntime(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_start_conditions_are_fatal() {
        assert!(AutomationError::InvalidRegion("0x0".into()).is_fatal());
        assert!(AutomationError::PageNotLoaded.is_fatal());
        assert!(!AutomationError::CaptureFailure("x".into()).is_fatal());
        assert!(!AutomationError::FieldNotFound("textarea".into()).is_fatal());
        assert!(!AutomationError::EngineUnavailable("x".into()).is_fatal());
    }

    #[test]
    fn test_ocr_error_conversion() {
        let e: AutomationError = OcrError::EngineUnavailable("missing".into()).into();
        assert_eq!(e, AutomationError::EngineUnavailable("missing".into()));
        assert_eq!(
            format!("{}", AutomationError::from(OcrError::Runtime("bad".into()))),
            "OCR runtime error: bad"
        );
    }
}
