//! Immich OCR loop
//!
//! Reads a short piece of text (usually a username) off each item shown in a
//! browser page and writes it into that item's description field, then moves
//! on to the next item, forever or until stopped.

pub mod automation;
pub mod capture;
pub mod error;
pub mod logging;
pub mod ocr;
pub mod page;
pub mod paths;

pub use error::{AutomationError, OcrError};
