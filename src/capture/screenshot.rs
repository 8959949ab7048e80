//! Capturer boundary.
//!
//! The capturer is an external collaborator: it hands back an owned raster
//! snapshot of either the configured region or the whole visible page.

use async_trait::async_trait;
use image::RgbaImage;

use super::region::Region;
use crate::error::AutomationError;

/// What to capture for one cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureTarget {
    /// The user-selected region.
    Region(Region),
    /// The entire visible page.
    FullPage,
}

impl CaptureTarget {
    pub fn is_full_page(&self) -> bool {
        matches!(self, CaptureTarget::FullPage)
    }
}

impl std::fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureTarget::Region(region) => write!(f, "region {}", region),
            CaptureTarget::FullPage => write!(f, "full page"),
        }
    }
}

/// Produces raster snapshots of the page.
///
/// Ownership of the returned image passes to the caller; the capturer keeps
/// no reference to it.
#[async_trait]
pub trait Capturer: Send + Sync {
    async fn capture(&self, target: CaptureTarget) -> Result<RgbaImage, AutomationError>;
}
