use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::script::{count_script, injection_script};
use super::PageRenderer;
use crate::error::AutomationError;

/// How an injection attempt ended.
#[derive(Clone, Debug, PartialEq)]
pub enum InjectionOutcome {
    /// The field was found, written and blurred.
    Confirmed,
    /// No element matched the field selector.
    FieldNotFound,
    /// The renderer failed to run the script.
    Failed(AutomationError),
}

impl InjectionOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, InjectionOutcome::Confirmed)
    }

    pub fn error(&self, selector: &str) -> Option<AutomationError> {
        match self {
            InjectionOutcome::Confirmed => None,
            InjectionOutcome::FieldNotFound => {
                Some(AutomationError::FieldNotFound(selector.to_string()))
            }
            InjectionOutcome::Failed(e) => Some(e.clone()),
        }
    }
}

/// Writes tokens into the page's target field.
#[derive(Clone)]
pub struct Injector {
    renderer: Arc<dyn PageRenderer>,
    field_selector: String,
    notification_selector: String,
}

impl Injector {
    pub fn new(renderer: Arc<dyn PageRenderer>, field_selector: &str, notification_selector: &str) -> Self {
        Self {
            renderer,
            field_selector: field_selector.to_string(),
            notification_selector: notification_selector.to_string(),
        }
    }

    pub fn field_selector(&self) -> &str {
        &self.field_selector
    }

    /// Writes `token` and triggers the page's save-on-blur.
    ///
    /// Resolves once the script has returned. Never fails outright: a missing
    /// field or a renderer error comes back as an unconfirmed outcome.
    pub async fn inject(&self, token: &str) -> InjectionOutcome {
        info!("Injecting '{}' into {}", token, self.field_selector);
        let script = injection_script(&self.field_selector, token);

        match self.renderer.run_script(&script).await {
            Ok(Some(Value::Bool(true))) => InjectionOutcome::Confirmed,
            Ok(result) => {
                debug!("Injection script returned {:?}", result);
                warn!("Target field not found: {}", self.field_selector);
                InjectionOutcome::FieldNotFound
            }
            Err(e) => {
                warn!("Injection script failed: {}", e);
                InjectionOutcome::Failed(e)
            }
        }
    }

    /// Best-effort check for the page's save notification.
    ///
    /// Advisory only: the loop logs the answer and moves on either way.
    pub async fn verify_saved(&self) -> bool {
        match self
            .renderer
            .run_script(&count_script(&self.notification_selector))
            .await
        {
            Ok(Some(Value::Number(n))) => n.as_u64().unwrap_or(0) > 0,
            Ok(_) => false,
            Err(e) => {
                debug!("Save verification failed: {}", e);
                false
            }
        }
    }
}
