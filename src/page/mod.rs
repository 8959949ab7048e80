//! Page-script boundary: the only "wire protocol" between the loop and the
//! rendered page.
//!
//! This module provides:
//! - The renderer boundary (`PageRenderer`)
//! - Script generation (`script`)
//! - Token injection (`Injector`) and item navigation (`Navigator`)
//! - A Chrome DevTools implementation of the renderer and capturer (`cdp`)

pub mod cdp;
pub mod injector;
pub mod navigator;
pub mod script;

pub use cdp::CdpPage;
pub use injector::{InjectionOutcome, Injector};
pub use navigator::Navigator;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::AutomationError;

/// Runs scripts against the hosted page.
///
/// A script yields at most one value. Only one script runs against the page
/// at a time; callers are responsible for not overlapping operations of the
/// same kind.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn run_script(&self, script: &str) -> Result<Option<Value>, AutomationError>;
}

/// Whether the page has loaded far enough to be automated.
pub async fn is_page_loaded(renderer: &dyn PageRenderer) -> bool {
    match renderer.run_script(&script::ready_state_script()).await {
        Ok(Some(Value::String(state))) => {
            debug!("document.readyState = {}", state);
            state == "interactive" || state == "complete"
        }
        Ok(other) => {
            debug!("Unexpected readyState result: {:?}", other);
            false
        }
        Err(e) => {
            debug!("readyState check failed: {}", e);
            false
        }
    }
}
