//! The capture → OCR → inject → navigate loop.
//!
//! This module provides:
//! - Configuration loaded from config.json (`AutomationConfig`)
//! - Loop states and the event stream (`LoopState`, `LoopEvent`)
//! - The OCR work queue and its worker thread
//! - The loop controller actor and its handle (`spawn_loop`, `LoopHandle`)

pub mod config;
pub mod ocr_worker;
pub mod queue;
pub mod runner;
pub mod state;

pub use config::{AutomationConfig, TesseractMode};
pub use runner::{spawn_loop, Collaborators, LoopHandle};
pub use state::{LoopEvent, LoopState, LoopStatus};
