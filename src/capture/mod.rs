//! Capture of the page area that carries the text to read.
//!
//! This module provides:
//! - The capture region and its persistence (`Region`, `RegionStore`)
//! - The capturer boundary (`Capturer`, `CaptureTarget`)

pub mod region;
pub mod screenshot;

pub use region::{Region, RegionStore};
pub use screenshot::{CaptureTarget, Capturer};
