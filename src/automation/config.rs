//! Configuration types for automation.
//!
//! Loaded from config.json at startup and handed to the loop controller
//! explicitly. The controller snapshots it at the start of every cycle, so a
//! replacement only affects the next cycle.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::capture::{CaptureTarget, Region};
use crate::ocr::OcrMode;

/// Allowed range for both loop delays when read from user input.
pub const MIN_DELAY_MS: u64 = 500;
pub const MAX_DELAY_MS: u64 = 10_000;

/// How to pick the OCR segmentation mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TesseractMode {
    /// Sparse for region captures, block for full-page captures.
    #[default]
    Auto,
    Sparse,
    Block,
}

impl TesseractMode {
    pub fn resolve(self, target: &CaptureTarget) -> OcrMode {
        match self {
            TesseractMode::Sparse => OcrMode::Sparse,
            TesseractMode::Block => OcrMode::Block,
            TesseractMode::Auto if target.is_full_page() => OcrMode::Block,
            TesseractMode::Auto => OcrMode::Sparse,
        }
    }
}

/// Complete automation configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// OCR segmentation strategy
    pub tesseract_mode: TesseractMode,
    /// Tesseract page segmentation mode for sparse text
    pub psm_sparse: u8,
    /// Tesseract page segmentation mode for uniform blocks
    pub psm_block: u8,
    /// OCR language
    pub language: String,
    /// Explicit tesseract binary; discovered when absent
    pub tesseract_path: Option<PathBuf>,
    /// Raw text shorter than this (after trimming) is rejected
    pub min_text_length: usize,
    /// Case-insensitive substrings that mark a capture as unusable
    pub excluded_patterns: Vec<String>,
    /// Phrase preceding the wanted token
    pub marker_phrase: String,
    /// Wait after navigating before the next capture (milliseconds)
    pub capture_delay_ms: u64,
    /// Wait after injecting before navigating (milliseconds)
    pub save_delay_ms: u64,
    /// Capture the whole page instead of the selected region
    pub full_page: bool,
    /// Restore the last selected region at startup
    pub remember_region: bool,
    /// Selector of the field that receives the token
    pub field_selector: String,
    /// Selector of the page's save notification
    pub notification_selector: String,
    /// Look for the save notification after each injection (log only)
    pub verify_save: bool,
    /// DevTools endpoint of the browser hosting the page
    pub debugger_url: String,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            tesseract_mode: TesseractMode::Auto,
            psm_sparse: 11,
            psm_block: 6,
            language: "eng".to_string(),
            tesseract_path: None,
            min_text_length: 3,
            excluded_patterns: vec![
                "NO USER".to_string(),
                "CAPTCHA".to_string(),
                "LOADING".to_string(),
            ],
            marker_phrase: "Reply to".to_string(),
            capture_delay_ms: 2000,
            save_delay_ms: 1500,
            full_page: false,
            remember_region: true,
            field_selector: r#"textarea[data-testid="autogrow-textarea"]"#.to_string(),
            notification_selector: r#"[data-testid="notification"]"#.to_string(),
            verify_save: true,
            debugger_url: "http://127.0.0.1:9222".to_string(),
        }
    }
}

impl AutomationConfig {
    /// Clamps user-supplied delays into the supported range.
    pub fn sanitize(mut self) -> Self {
        for (name, value) in [
            ("capture_delay_ms", &mut self.capture_delay_ms),
            ("save_delay_ms", &mut self.save_delay_ms),
        ] {
            let clamped = (*value).clamp(MIN_DELAY_MS, MAX_DELAY_MS);
            if clamped != *value {
                warn!("{} = {} out of range, using {}", name, value, clamped);
                *value = clamped;
            }
        }
        self
    }

    /// What one cycle should capture, given the current region.
    pub fn capture_target(&self, region: Option<Region>) -> Option<CaptureTarget> {
        if self.full_page {
            return Some(CaptureTarget::FullPage);
        }
        region.map(CaptureTarget::Region)
    }

    /// Loads configuration from `path`, or returns defaults.
    pub fn load(path: &Path) -> Self {
        info!("Looking for config at: {}", path.display());

        if !path.exists() {
            info!("{} not found. Using default config.", path.display());
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<AutomationConfig>(&contents) {
                Ok(config) => {
                    info!("Config loaded from {}", path.display());
                    config.sanitize()
                }
                Err(e) => {
                    warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }
}
