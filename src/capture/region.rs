//! Capture region and its on-disk record.
//!
//! Regions are stored in logical (DPI-independent) page coordinates. The
//! capturer scales them to physical pixels when it grabs the frame.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::AutomationError;

/// Rectangle of the page to capture for OCR.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Builds a confirmed region. Zero-area selections are rejected.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Result<Self, AutomationError> {
        let region = Self {
            x,
            y,
            width,
            height,
        };
        region.validate()?;
        Ok(region)
    }

    pub fn validate(&self) -> Result<(), AutomationError> {
        if self.width == 0 || self.height == 0 {
            return Err(AutomationError::InvalidRegion(format!(
                "{}x{} at ({}, {}) has no area",
                self.width, self.height, self.x, self.y
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} at ({}, {})", self.width, self.height, self.x, self.y)
    }
}

/// Parses `X,Y,W,H`.
impl FromStr for Region {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(AutomationError::InvalidRegion(format!(
                "expected X,Y,W,H but got '{}'",
                s
            )));
        }

        let mut values = [0u32; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| {
                AutomationError::InvalidRegion(format!("'{}' is not a non-negative integer", part))
            })?;
        }

        Region::new(values[0], values[1], values[2], values[3])
    }
}

/// Persists the last confirmed region between sessions.
#[derive(Clone, Debug)]
pub struct RegionStore {
    path: PathBuf,
}

impl RegionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored region.
    ///
    /// A missing file, an unreadable record or a zero-area record all yield
    /// `None`; the user simply has to select a region again.
    pub fn load(&self) -> Option<Region> {
        if !self.path.exists() {
            info!("No saved capture region at {}", self.path.display());
            return None;
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<Region>(&contents) {
            Ok(region) if region.validate().is_ok() => {
                info!("Restored capture region: {}", region);
                Some(region)
            }
            Ok(region) => {
                warn!("Ignoring saved region with no area: {}", region);
                None
            }
            Err(e) => {
                warn!("Failed to parse {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Writes the region, creating the parent directory if needed.
    pub fn save(&self, region: &Region) -> Result<()> {
        region.validate()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create region directory")?;
        }
        let json = serde_json::to_string_pretty(region)?;
        fs::write(&self.path, json).context("Failed to write region file")?;
        info!("Saved capture region: {}", region);
        Ok(())
    }

    /// Removes the stored region. Clearing an absent record is not an error.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).context("Failed to remove region file")?;
            info!("Cleared saved capture region");
        }
        Ok(())
    }
}
