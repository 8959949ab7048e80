use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::script::navigation_script;
use super::PageRenderer;

/// Advances the page to the next item using its own keyboard handling.
#[derive(Clone)]
pub struct Navigator {
    renderer: Arc<dyn PageRenderer>,
}

impl Navigator {
    pub fn new(renderer: Arc<dyn PageRenderer>) -> Self {
        Self { renderer }
    }

    /// Dispatches the advance key. Returns whether the key event went out;
    /// whether the page actually moved is never awaited.
    pub async fn next(&self) -> bool {
        info!("Navigating to next item");
        match self.renderer.run_script(&navigation_script()).await {
            Ok(Some(Value::Bool(true))) => true,
            Ok(other) => {
                debug!("Navigation script returned {:?}", other);
                warn!("Navigation key could not be dispatched");
                false
            }
            Err(e) => {
                warn!("Navigation script failed: {}", e);
                false
            }
        }
    }
}
